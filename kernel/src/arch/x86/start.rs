pub const STACK_SIZE: usize = 16 * 1024;

/// `IA32_APIC_BASE` bit 8, set only on the core the firmware started
pub const BOOTSTRAP_FLAG: u32 = 1 << 8;

#[cfg(target_os = "none")]
pub use entry::*;

#[cfg(target_os = "none")]
mod entry {
    use core::arch::global_asm;

    use crate::{arch::cpu::__stack_chk_guard, arch::msr::ModelSpecificRegister, mp::MAX_CORES};

    use super::{BOOTSTRAP_FLAG, STACK_SIZE};

    #[repr(C, align(16))]
    struct Stacks([[u8; STACK_SIZE]; MAX_CORES]);

    static mut STACKS: Stacks = Stacks([[0; STACK_SIZE]; MAX_CORES]);

    // Every core, the bootstrap one included, enters here with interrupts in an unknown
    // state and no stack. The stack is picked from the hardware core id before any Rust code
    // runs, then the `init_core(apic_id)` the binary exports takes over. A core whose id has
    // no stack stops here.
    global_asm!(
        include_str!("start.s"),
        apic_base_msr = const ModelSpecificRegister::ApicBase as u32,
        bootstrap_flag = const BOOTSTRAP_FLAG,
        stack_guard = sym __stack_chk_guard,
        max_cores = const MAX_CORES,
        stack_size = const STACK_SIZE,
        stacks = sym STACKS,
    );

    unsafe extern "C" {
        fn _start() -> !;
    }

    /// Address a woken core is sent to once the trampoline reaches protected mode
    pub fn entry_address() -> u32 {
        _start as usize as u32
    }
}
