use core::arch::asm;

use bit_field::BitField;
use spin::{Mutex, Once};

use super::{DescriptorTableRegister, gdt};

/// Exceptions, the remapped legacy IRQs and the local controller vectors
pub const VECTOR_COUNT: usize = 48;

pub type Handler = extern "x86-interrupt" fn(InterruptStackFrame);

#[derive(Debug, PartialEq)]
#[repr(C, align(16))]
pub struct InterruptDescriptorTable {
    table: [Entry; VECTOR_COUNT],
}

impl InterruptDescriptorTable {
    pub const fn empty() -> Self {
        Self {
            table: [Entry::missing(); VECTOR_COUNT],
        }
    }

    /// Point every vector at its default handler
    pub fn install_default(&mut self) {
        for (entry, handler) in self.table.iter_mut().zip(DEFAULT_HANDLERS) {
            entry.set_handler_address(handler as usize);
        }
    }

    pub fn install(&mut self, vector: u8, address: usize) {
        assert!(
            (vector as usize) < VECTOR_COUNT,
            "interrupt vector {} is out of range",
            vector
        );

        self.table[vector as usize].set_handler_address(address);
    }

    pub fn entry(&self, vector: u8) -> &Entry {
        &self.table[vector as usize]
    }

    pub fn register(&self) -> DescriptorTableRegister {
        DescriptorTableRegister {
            address: self as *const Self as usize,
            size: (size_of::<Self>() - 1) as u16,
        }
    }
}

/// 32-bit interrupt gate
#[derive(Debug, PartialEq, Clone, Copy)]
#[repr(C)]
pub struct Entry {
    address_low: u16,
    selector: u16,
    reserved: u8,
    attributes: u8,
    address_high: u16,
}

impl Entry {
    pub const fn missing() -> Self {
        Self {
            address_low: 0,
            selector: 0,
            reserved: 0,
            attributes: 0,
            address_high: 0,
        }
    }

    pub fn set_handler_address(&mut self, address: usize) -> &mut Self {
        self.address_low = address as u16;
        self.address_high = (address >> 16) as u16;
        self.selector = gdt::KERNEL_CODE_SELECTOR;

        // 0b1110 is a 32-bit interrupt gate, privilege level stays 0
        self.attributes.set_bits(0..4, 0b1110);
        self.attributes.set_bit(7, true);

        self
    }

    pub fn handler_address(&self) -> u32 {
        ((self.address_high as u32) << 16) | self.address_low as u32
    }

    pub fn selector(&self) -> u16 {
        self.selector
    }

    pub fn attributes(&self) -> u8 {
        self.attributes
    }

    pub fn is_present(&self) -> bool {
        self.attributes.get_bit(7)
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
#[repr(C)]
pub struct InterruptStackFrame {
    pub eip: usize,
    pub cs: usize,
    pub eflags: usize,
}

macro_rules! default_handlers {
    ($($vector:literal),* $(,)?) => {
        [$({
            extern "x86-interrupt" fn handle(_: InterruptStackFrame) {
                panic!("unhandled interrupt vector {}", $vector);
            }

            handle as Handler
        }),*]
    };
}

static DEFAULT_HANDLERS: [Handler; VECTOR_COUNT] = default_handlers![
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
    26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47,
];

static IDT: Mutex<InterruptDescriptorTable> = Mutex::new(InterruptDescriptorTable::empty());
static BUILT: Once = Once::new();

/// Build the shared table on first use, then load it on this core
pub fn init() {
    BUILT.call_once(|| IDT.lock().install_default());

    activate();
}

pub fn install(vector: u8, handler: Handler) {
    IDT.lock().install(vector, handler as usize);
}

pub fn activate() {
    let register = IDT.lock().register();

    unsafe {
        asm!("lidt [{}]", in(reg) &register, options(readonly, nostack, preserves_flags));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_install_fills_every_vector() {
        let mut idt = InterruptDescriptorTable::empty();
        idt.install_default();

        for vector in 0..VECTOR_COUNT as u8 {
            let entry = idt.entry(vector);

            assert!(entry.is_present());
            assert_eq!(entry.selector(), 0x10);
            assert_eq!(entry.attributes(), 0x8e);
            assert_eq!(
                entry.handler_address(),
                DEFAULT_HANDLERS[vector as usize] as usize as u32
            );
        }
    }

    #[test]
    fn default_install_is_idempotent() {
        let mut once = InterruptDescriptorTable::empty();
        once.install_default();

        let mut twice = InterruptDescriptorTable::empty();
        twice.install_default();
        twice.install_default();

        assert_eq!(once, twice);
    }

    #[test]
    fn default_handlers_are_distinct() {
        for (vector, handler) in DEFAULT_HANDLERS.iter().enumerate().skip(1) {
            assert_ne!(*handler as usize, DEFAULT_HANDLERS[vector - 1] as usize);
        }
    }

    #[test]
    fn install_replaces_one_vector() {
        let mut idt = InterruptDescriptorTable::empty();
        idt.install_default();

        let before = *idt.entry(31);
        idt.install(32, 0x0012_3456);

        assert_eq!(idt.entry(32).handler_address(), 0x0012_3456);
        assert_eq!(idt.entry(32).attributes(), 0x8e);
        assert_eq!(*idt.entry(31), before);
    }

    #[test]
    #[should_panic(expected = "interrupt vector 48 is out of range")]
    fn install_past_the_table_panics() {
        InterruptDescriptorTable::empty().install(48, 0x1000);
    }

    #[test]
    fn register_covers_the_whole_table() {
        let idt = InterruptDescriptorTable::empty();
        let register = idt.register();
        let size = register.size;

        assert_eq!(size, 48 * 8 - 1);
        assert_eq!(size_of::<Entry>(), 8);
    }
}
