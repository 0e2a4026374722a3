use spin::Once;

use super::io_ports::{PortIo, Ports};

pub const MASTER_COMMAND_PORT: u16 = 0x20;
pub const MASTER_DATA_PORT: u16 = MASTER_COMMAND_PORT + 0x01;

pub const SLAVE_COMMAND_PORT: u16 = 0xA0;
pub const SLAVE_DATA_PORT: u16 = SLAVE_COMMAND_PORT + 0x01;

/// Vector of IRQ 0 after remapping
pub const MASTER_OFFSET: u8 = 0x20;
/// Vector of IRQ 8 after remapping
pub const SLAVE_OFFSET: u8 = 0x28;

const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
const ICW4_8086: u8 = 0x01;
const END_OF_INTERRUPT: u8 = 0x20;

/// The legacy 8259 master/slave pair
pub struct Pic<P: PortIo> {
    ports: P,
}

impl<P: PortIo> Pic<P> {
    pub const fn new(ports: P) -> Self {
        Self { ports }
    }

    /// Move IRQ 0..16 to `master_offset..master_offset + 8` and
    /// `slave_offset..slave_offset + 8`, keeping the current masks
    pub fn remap(&mut self, master_offset: u8, slave_offset: u8) {
        let master_mask = self.ports.read(MASTER_DATA_PORT);
        let slave_mask = self.ports.read(SLAVE_DATA_PORT);

        self.ports.write(MASTER_COMMAND_PORT, ICW1_INIT | ICW1_ICW4);
        self.ports.write(SLAVE_COMMAND_PORT, ICW1_INIT | ICW1_ICW4);

        self.ports.write(MASTER_DATA_PORT, master_offset);
        self.ports.write(SLAVE_DATA_PORT, slave_offset);

        // The slave hangs off IRQ 2 of the master
        self.ports.write(MASTER_DATA_PORT, 1 << 2);
        self.ports.write(SLAVE_DATA_PORT, 2);

        self.ports.write(MASTER_DATA_PORT, ICW4_8086);
        self.ports.write(SLAVE_DATA_PORT, ICW4_8086);

        self.ports.write(MASTER_DATA_PORT, master_mask);
        self.ports.write(SLAVE_DATA_PORT, slave_mask);
    }

    pub fn set_master_mask(&mut self, mask: u8) {
        self.ports.write(MASTER_DATA_PORT, mask);
    }

    pub fn set_slave_mask(&mut self, mask: u8) {
        self.ports.write(SLAVE_DATA_PORT, mask);
    }

    pub fn end_of_interrupt(&mut self, irq: u8) {
        if irq >= 8 {
            self.ports.write(SLAVE_COMMAND_PORT, END_OF_INTERRUPT);
        }

        self.ports.write(MASTER_COMMAND_PORT, END_OF_INTERRUPT);
    }

    /// Mask every line on both controllers
    pub fn disable(&mut self) {
        self.set_master_mask(0xff);
        self.set_slave_mask(0xff);
    }
}

/// Both controllers are shared by every core
static REMAPPED: Once = Once::new();

/// Remap the controllers the first time any core gets here. A core arriving while the init
/// words are still being written waits for them, later cores leave the controllers alone.
pub fn remap() {
    remap_once(&REMAPPED, Ports);
}

fn remap_once<P: PortIo>(remapped: &Once, ports: P) {
    remapped.call_once(|| Pic::new(ports).remap(MASTER_OFFSET, SLAVE_OFFSET));
}

pub fn disable() {
    Pic::new(Ports).disable();
}
