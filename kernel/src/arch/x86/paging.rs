use core::ops::{Index, IndexMut};

use bit_field::BitField;

use crate::mp::{CoreId, PerCore};

use super::{cpu::ControlRegister, local_apic::LOCAL_APIC_BASE};

const TABLE_ENTRY_COUNT: usize = 1024;
pub const PAGE_SIZE: u32 = 4096;

/// Everything below this address is identity mapped
pub const IDENTITY_LIMIT: u32 = 0x40_0000;

/// One address space per core, built by that core before it turns paging on
pub static ADDRESS_SPACES: PerCore<AddressSpace> = PerCore::new(AddressSpace::empty());

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [Entry; TABLE_ENTRY_COUNT],
}

impl PageTable {
    pub const fn empty() -> Self {
        Self {
            entries: [Entry(0); TABLE_ENTRY_COUNT],
        }
    }

    /// Physical address of this table. Valid because page tables live in identity mapped
    /// memory.
    pub fn phys(&self) -> u32 {
        self as *const Self as usize as u32
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|entry| !entry.is_present())
    }
}

impl Index<u32> for PageTable {
    type Output = Entry;

    fn index(&self, index: u32) -> &Self::Output {
        &self.entries[index as usize]
    }
}

impl IndexMut<u32> for PageTable {
    fn index_mut(&mut self, index: u32) -> &mut Self::Output {
        &mut self.entries[index as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(transparent)]
pub struct Entry(u32);

impl Entry {
    /// Get the physical address stored in this entry
    #[inline]
    pub fn get_phys(&self) -> u32 {
        self.0.get_bits(12..32) << 12
    }

    /// Set the physical address stored in this entry
    #[inline]
    pub fn set_phys(&mut self, phys: u32) -> &mut Entry {
        self.0.set_bits(12..32, phys >> 12);
        self
    }

    /// Whether the mapped frame or page table is loaded in memory.
    #[inline]
    pub fn is_present(&self) -> bool {
        self.0.get_bit(0)
    }

    #[inline]
    pub fn set_present(&mut self, is_present: bool) -> &mut Self {
        self.0.set_bit(0, is_present);
        self
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.0.get_bit(1)
    }

    /// Controls whether writes to the mapped frames are allowed.
    #[inline]
    pub fn set_writable(&mut self, is_writable: bool) -> &mut Self {
        self.0.set_bit(1, is_writable);
        self
    }

    #[inline]
    pub fn is_write_through(&self) -> bool {
        self.0.get_bit(3)
    }

    /// If this bit is set, a “write-through” policy is used for the cache, else a “write-back”
    /// policy is used.
    #[inline]
    pub fn set_write_through(&mut self, can_write_through: bool) -> &mut Self {
        self.0.set_bit(3, can_write_through);
        self
    }

    #[inline]
    pub fn is_cachable(&self) -> bool {
        !self.0.get_bit(4)
    }

    /// Specifies whether the pointed entry is cachable.
    #[inline]
    pub fn set_cachability(&mut self, is_cachable: bool) -> &mut Self {
        // Setting bit 4 disables caching
        self.0.set_bit(4, !is_cachable);
        self
    }
}

/// A page directory with the two page tables it needs: the low 4 MiB and the local
/// interrupt controller page
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct AddressSpace {
    directory: PageTable,
    identity: PageTable,
    local_apic: PageTable,
    built: bool,
}

impl AddressSpace {
    pub const fn empty() -> Self {
        Self {
            directory: PageTable::empty(),
            identity: PageTable::empty(),
            local_apic: PageTable::empty(),
            built: false,
        }
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn directory_phys(&self) -> u32 {
        self.directory.phys()
    }

    /// Fill the tables in place. The directory records the tables' own addresses, so the
    /// address space must not move afterwards.
    pub fn build(&mut self) {
        let identity_phys = self.identity.phys();
        let local_apic_phys = self.local_apic.phys();

        self.directory[0]
            .set_phys(identity_phys)
            .set_present(true)
            .set_writable(true);

        self.directory[LOCAL_APIC_BASE >> 22]
            .set_phys(local_apic_phys)
            .set_present(true)
            .set_writable(true);

        for index in 0..TABLE_ENTRY_COUNT as u32 {
            self.identity[index]
                .set_phys(index * PAGE_SIZE)
                .set_present(true)
                .set_writable(true);
        }

        self.local_apic[(LOCAL_APIC_BASE >> 12) & 0x3ff]
            .set_phys(LOCAL_APIC_BASE)
            .set_present(true)
            .set_writable(true)
            .set_write_through(true)
            .set_cachability(false);

        self.built = true;
    }

    fn table_at(&self, phys: u32) -> Option<&PageTable> {
        [&self.identity, &self.local_apic]
            .into_iter()
            .find(|table| table.phys() == phys)
    }

    /// The page table entry that maps `virt`, if there is one
    pub fn page_entry(&self, virt: u32) -> Option<Entry> {
        let directory_entry = self.directory[virt >> 22];

        if !directory_entry.is_present() {
            return None;
        }

        let entry = self.table_at(directory_entry.get_phys())?[(virt >> 12) & 0x3ff];

        entry.is_present().then_some(entry)
    }

    pub fn translate(&self, virt: u32) -> Option<u32> {
        self.page_entry(virt)
            .map(|entry| entry.get_phys() | (virt % PAGE_SIZE))
    }
}

/// Build this core's address space and point CR3 at it
pub fn init_for_current_core(core: CoreId) {
    let mut address_space = ADDRESS_SPACES.get(core);

    address_space.build();

    ControlRegister::Cr3.write(address_space.directory_phys() as usize);
}

pub fn enable(core: CoreId) {
    assert!(
        ADDRESS_SPACES.get(core).is_built(),
        "core {}: paging enabled before its tables were built",
        core
    );

    let mut cr0 = ControlRegister::Cr0.read();
    cr0.set_bit(31, true);
    ControlRegister::Cr0.write(cr0);
}

pub fn disable() {
    let mut cr0 = ControlRegister::Cr0.read();
    cr0.set_bit(31, false);
    ControlRegister::Cr0.write(cr0);
}
