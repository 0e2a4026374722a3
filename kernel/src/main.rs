#![cfg_attr(target_os = "none", no_std, no_main)]

#[cfg(target_os = "none")]
use bringup_kernel::{
    arch::{self, cpu, trampoline},
    mp::{CORE_STATES, CoreId, CoreState, MAX_CORES},
    println,
};

/// Every core lands here from `_start`, already on its own stack. The bootstrap core then
/// wakes the others, which run the same sequence.
#[cfg(target_os = "none")]
#[unsafe(no_mangle)]
extern "C" fn init_core(apic_id: u32) -> ! {
    let core = match CoreId::try_from(apic_id) {
        Ok(core) => core,
        Err(error) => panic!("{}", error),
    };

    CORE_STATES.set(core, CoreState::Initializing);

    let bootstrap = cpu::is_bootstrap();

    if !bootstrap {
        let handoff = trampoline::read_handoff();

        if !handoff.is_for(core) {
            panic!("woken through the handoff of core {}", handoff.core);
        }
    }

    let mut local_apic = match arch::init_core(core) {
        Ok(local_apic) => local_apic,
        Err(error) => panic!("{}", error),
    };

    CORE_STATES.set(core, CoreState::Ready);

    println!("core {}: initialized", core);

    if bootstrap {
        match trampoline::boot_cores(&mut local_apic, core) {
            Ok(ready) => println!("core {}: {} of {} cores ready", core, ready, MAX_CORES),
            Err(error) => panic!("{}", error),
        }
    }

    arch::halt();
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("bringup_kernel runs on bare metal only, build and boot it with the builder");
    std::process::exit(1);
}
