#[cfg(all(target_os = "none", not(test)))]
#[panic_handler]
fn panic_handler(info: &core::panic::PanicInfo) -> ! {
    use crate::{
        arch::{self, cpu, interrupts},
        console,
    };

    interrupts::disable();

    let core = cpu::apic_id();

    console::_print_panic(format_args!("*** core {}: {} ***\n", core, info.message()));

    if let Some(location) = info.location() {
        console::_print_panic(format_args!("*** core {}: at {} ***\n", core, location));
    }

    arch::halt();
}
