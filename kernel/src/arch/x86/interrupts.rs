use core::arch::asm;

use bit_field::BitField;

pub fn disable() {
    unsafe {
        asm!("cli", options(nomem, nostack));
    }
}

pub fn enable() {
    unsafe {
        asm!("sti", options(nomem, nostack));
    }
}

pub fn wait_for_interrupts() {
    unsafe {
        asm!("hlt", options(nomem, nostack));
    }
}

/// Enable interrupts and halt. No interrupt can be taken between the two instructions.
pub fn enable_and_wait() {
    unsafe {
        asm!("sti", "hlt", options(nomem, nostack));
    }
}

pub fn are_enabled() -> bool {
    let flags: usize;

    unsafe {
        asm!("pushf", "pop {}", out(reg) flags, options(nomem, preserves_flags));
    }

    flags.get_bit(9)
}

/// Run `f` with interrupts disabled, restoring the previous state afterwards
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let were_enabled = are_enabled();

    if were_enabled {
        disable();
    }

    let result = f();

    if were_enabled {
        enable();
    }

    result
}
