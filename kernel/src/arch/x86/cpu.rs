use core::{arch::asm, sync::atomic::AtomicUsize};

#[cfg(target_arch = "x86")]
use core::arch::x86::{CpuidResult, __cpuid};
#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::{CpuidResult, __cpuid};

use bit_field::BitField;

use super::{
    gdt,
    io_ports::{PortIo, Ports},
    msr::ModelSpecificRegister,
    pic,
};

/// System control port A, bit 1 gates address line 20 and bit 0 resets the machine
pub const SYSTEM_CONTROL_PORT: u16 = 0x92;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRegister {
    Cr0,
    Cr3,
    Cr4,
}

impl ControlRegister {
    pub fn read(self) -> usize {
        let value: usize;

        unsafe {
            match self {
                ControlRegister::Cr0 => asm!("mov {}, cr0", out(reg) value, options(nomem, nostack, preserves_flags)),
                ControlRegister::Cr3 => asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags)),
                ControlRegister::Cr4 => asm!("mov {}, cr4", out(reg) value, options(nomem, nostack, preserves_flags)),
            }
        }

        value
    }

    pub fn write(self, value: usize) {
        unsafe {
            match self {
                ControlRegister::Cr0 => asm!("mov cr0, {}", in(reg) value, options(nostack, preserves_flags)),
                ControlRegister::Cr3 => asm!("mov cr3, {}", in(reg) value, options(nostack, preserves_flags)),
                ControlRegister::Cr4 => asm!("mov cr4, {}", in(reg) value, options(nostack, preserves_flags)),
            }
        }
    }
}

pub fn cpuid(leaf: u32) -> CpuidResult {
    #[allow(unused_unsafe)]
    unsafe {
        __cpuid(leaf)
    }
}

/// Hardware identity of the executing core, from the initial local APIC id
pub fn apic_id() -> u32 {
    cpuid(1).ebx >> 24
}

pub fn has_local_apic() -> bool {
    cpuid(1).edx.get_bit(9)
}

pub fn has_sse() -> bool {
    cpuid(1).edx.get_bit(25)
}

/// Whether the executing core is the one the firmware started
pub fn is_bootstrap() -> bool {
    ModelSpecificRegister::ApicBase.read().get_bit(8)
}

pub fn rdtsc() -> u64 {
    let low: u32;
    let high: u32;

    unsafe {
        asm!("rdtsc", out("eax") low, out("edx") high, options(nomem, nostack, preserves_flags));
    }

    ((high as u64) << 32) | low as u64
}

/// Open address line 20 through the fast gate, leaving the reset bit clear
pub fn enable_a20(ports: &mut impl PortIo) {
    let control = ports.read(SYSTEM_CONTROL_PORT);

    if !control.get_bit(1) {
        let mut control = control;
        control.set_bit(1, true);
        control.set_bit(0, false);

        ports.write(SYSTEM_CONTROL_PORT, control);
    }
}

/// Let the core execute SSE instructions if it has them
pub fn enable_sse() {
    if !has_sse() {
        return;
    }

    let mut cr0 = ControlRegister::Cr0.read();
    cr0.set_bit(2, false); // emulation
    cr0.set_bit(1, true); // monitor coprocessor
    ControlRegister::Cr0.write(cr0);

    let mut cr4 = ControlRegister::Cr4.read();
    cr4.set_bit(9, true); // fxsave and fxrstor
    cr4.set_bit(10, true); // unmasked simd exceptions
    ControlRegister::Cr4.write(cr4);
}

/// Canary checked by functions compiled with a stack protector. The bootstrap core
/// overwrites it in `_start`, before the first Rust frame, and nothing writes it after.
#[allow(non_upper_case_globals)]
#[cfg_attr(target_os = "none", unsafe(no_mangle))]
pub static __stack_chk_guard: AtomicUsize = AtomicUsize::new(0x595e_9fbd);

#[cfg(target_os = "none")]
#[unsafe(no_mangle)]
extern "C" fn __stack_chk_fail() -> ! {
    panic!("stack smashing detected");
}

/// Per-core processor setup run before any interrupt controller is touched
pub fn init() {
    enable_a20(&mut Ports);

    gdt::load();

    // No-op on every core after the first
    pic::remap();

    enable_sse();
}
