pub mod cpu;
pub mod gdt;
pub mod idt;
pub mod interrupts;
pub mod io_ports;
pub mod ipi;
pub mod local_apic;
pub mod msr;
pub mod paging;
pub mod pic;
pub mod pit;
pub mod start;
pub mod trampoline;

use crate::mp::CoreId;

use local_apic::{ApicError, LocalApic};

#[derive(Debug, Clone, Copy)]
#[repr(C, packed(2))]
pub struct DescriptorTableRegister {
    size: u16,
    address: usize,
}

/// The fixed per-core init sequence, run by every core on its own stack
pub fn init_core(core: CoreId) -> Result<LocalApic, ApicError> {
    interrupts::disable();

    cpu::init();

    let mut local_apic = LocalApic::probe(core)?;
    local_apic.init()?;

    paging::init_for_current_core(core);
    paging::enable(core);

    interrupts::enable();

    Ok(local_apic)
}
