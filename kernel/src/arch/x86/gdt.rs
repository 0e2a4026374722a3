use core::arch::asm;

use lazy_static::lazy_static;

use super::DescriptorTableRegister;

pub const KERNEL_DATA_SELECTOR: u16 = 0x08;
pub const KERNEL_CODE_SELECTOR: u16 = 0x10;

#[derive(Debug, PartialEq)]
pub struct GlobalDescriptorTable<const MAX: usize = 4> {
    table: [Entry; MAX],
    len: usize,
}

impl<const MAX: usize> GlobalDescriptorTable<MAX> {
    pub const fn empty() -> Self {
        Self {
            table: [Entry(0); MAX],
            len: 1,
        }
    }

    /// Append `descriptor` and return its selector
    pub const fn push(&mut self, descriptor: Descriptor) -> u16 {
        let selector = (self.len * size_of::<Entry>()) as u16;

        match descriptor {
            Descriptor::UserSegment(value) => {
                self.table[self.len] = Entry(value);
                self.len += 1;
            }
        }

        selector
    }

    pub fn entries(&self) -> &[Entry] {
        &self.table[..self.len]
    }

    pub fn register(&self) -> DescriptorTableRegister {
        DescriptorTableRegister {
            address: self.table.as_ptr() as usize,
            size: (self.len * size_of::<Entry>() - 1) as u16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(transparent)]
pub struct Entry(u64);

impl Entry {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Descriptor {
    UserSegment(u64),
}

/// Bits of the high dword of a code or data segment descriptor, as positions in the whole
/// 64-bit entry
mod descriptor_flags {
    /// Preset so the processor never writes the table on first use
    pub const ACCESSED: u64 = 1 << 40;
    /// Writable for data, readable for code
    pub const READ_WRITE: u64 = 1 << 41;
    pub const EXECUTABLE: u64 = 1 << 43;
    pub const CODE_OR_DATA: u64 = 1 << 44;
    pub const PRESENT: u64 = 1 << 47;
    /// 32-bit operands and addresses
    pub const DEFAULT_SIZE: u64 = 1 << 54;
    /// Limit counts 4 KiB pages
    pub const GRANULARITY: u64 = 1 << 55;

    pub const MAX_LIMIT: u64 = 0xFFFF | (0xF << 48);

    /// Base zero, limit 4 GiB, ring 0
    pub const FLAT: u64 =
        CODE_OR_DATA | PRESENT | READ_WRITE | ACCESSED | MAX_LIMIT | GRANULARITY | DEFAULT_SIZE;

    pub const KERNEL_CODE: u64 = FLAT | EXECUTABLE;

    pub const KERNEL_DATA: u64 = FLAT;
}

impl Descriptor {
    #[inline]
    pub const fn kernel_code_segment() -> Descriptor {
        Descriptor::UserSegment(descriptor_flags::KERNEL_CODE)
    }

    #[inline]
    pub const fn kernel_data_segment() -> Descriptor {
        Descriptor::UserSegment(descriptor_flags::KERNEL_DATA)
    }
}

lazy_static! {
    static ref GDT: GlobalDescriptorTable = {
        let mut gdt = GlobalDescriptorTable::empty();

        gdt.push(Descriptor::kernel_data_segment()); // 0x08
        gdt.push(Descriptor::kernel_code_segment()); // 0x10

        gdt
    };
}

/// Load the kernel GDT on this core. The code selector matches the one the boot code and
/// the trampoline already run under, so only the data segments are reloaded.
pub fn load() {
    unsafe {
        asm!("lgdt [{}]", in(reg) &GDT.register(), options(readonly, nostack, preserves_flags));

        asm!(
            "mov ds, {0:e}",
            "mov es, {0:e}",
            "mov fs, {0:e}",
            "mov gs, {0:e}",
            "mov ss, {0:e}",
            in(reg) KERNEL_DATA_SELECTOR as u32,
            options(nostack, preserves_flags)
        );
    }
}
