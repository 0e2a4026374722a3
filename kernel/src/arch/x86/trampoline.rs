use crate::mp::CoreId;

/// Physical page a woken core starts executing at, in real mode
pub const TRAMPOLINE_PAGE: u32 = 0x8000;

/// STARTUP IPI vector that points a core at [`TRAMPOLINE_PAGE`]
pub const STARTUP_VECTOR: u8 = (TRAMPOLINE_PAGE >> 12) as u8;

/// Mailbox at the end of the trampoline. Written by the waking core right before the
/// INIT/STARTUP pair, read by the woken core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Handoff {
    /// Protected mode address the trampoline jumps to
    pub entry: u32,
    /// The core the handoff is meant for
    pub core: u32,
}

impl Handoff {
    pub fn new(entry: u32, core: CoreId) -> Handoff {
        Handoff {
            entry,
            core: core.as_u8() as u32,
        }
    }

    pub fn is_for(&self, core: CoreId) -> bool {
        self.core == core.as_u8() as u32
    }
}

#[cfg(target_os = "none")]
pub use relocated::*;

#[cfg(target_os = "none")]
mod relocated {
    use core::{arch::global_asm, ptr};

    use spin::Once;

    use crate::{
        arch::{
            ipi::Ipi,
            local_apic::{ApicError, LocalApic},
            start,
        },
        mp::{Bringup, CORE_STATES, CoreId, CoreWaker},
    };

    use super::{Handoff, TRAMPOLINE_PAGE};

    // Runs at TRAMPOLINE_PAGE although it is linked elsewhere, so every address is computed
    // relative to the start of the blob. Enters protected mode with a flat GDT whose
    // selectors match the kernel GDT and jumps to the handoff entry.
    global_asm!(
        include_str!("trampoline.s"),
        page = const TRAMPOLINE_PAGE,
    );

    unsafe extern "C" {
        static bringup_trampoline: u8;
        static bringup_trampoline_end: u8;
        static bringup_handoff: u8;
    }

    static RELOCATED: Once = Once::new();

    fn blob_len() -> usize {
        (&raw const bringup_trampoline_end).addr() - (&raw const bringup_trampoline).addr()
    }

    fn handoff_ptr() -> *mut Handoff {
        let offset = (&raw const bringup_handoff).addr() - (&raw const bringup_trampoline).addr();

        ptr::with_exposed_provenance_mut(TRAMPOLINE_PAGE as usize + offset)
    }

    /// Copy the trampoline to its page. Only the first call copies.
    pub fn relocate() {
        RELOCATED.call_once(|| {
            let len = blob_len();

            assert!(len <= 4096, "trampoline does not fit in one page ({} bytes)", len);

            unsafe {
                ptr::copy_nonoverlapping(
                    &raw const bringup_trampoline,
                    ptr::with_exposed_provenance_mut(TRAMPOLINE_PAGE as usize),
                    len,
                );
            }
        });
    }

    pub fn write_handoff(handoff: Handoff) {
        unsafe { handoff_ptr().write_volatile(handoff) }
    }

    pub fn read_handoff() -> Handoff {
        unsafe { handoff_ptr().read_volatile() }
    }

    /// Wakes cores through the trampoline and this core's local interrupt controller
    pub struct StartupSequence<'a> {
        local_apic: &'a mut LocalApic,
    }

    impl CoreWaker for StartupSequence<'_> {
        fn relocate_trampoline(&mut self) {
            relocate();
        }

        fn publish_handoff(&mut self, core: CoreId) {
            write_handoff(Handoff::new(start::entry_address(), core));
        }

        fn send_ipi(&mut self, ipi: Ipi) -> Result<(), ApicError> {
            self.local_apic.send(ipi)
        }

        fn wait_ms(&mut self, msec: u32) -> Result<(), ApicError> {
            self.local_apic.wait_ms(msec)
        }
    }

    /// Wake every other core from the bootstrap core, returns how many cores are ready
    pub fn boot_cores(local_apic: &mut LocalApic, bootstrap: CoreId) -> Result<usize, ApicError> {
        let mut sequence = StartupSequence { local_apic };

        Bringup::new(&mut sequence, &CORE_STATES, bootstrap).run()
    }
}
