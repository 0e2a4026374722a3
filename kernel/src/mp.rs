use core::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use spin::{Mutex, MutexGuard};

use crate::arch::{ipi::Ipi, local_apic::ApicError, trampoline};

pub const MAX_CORES: usize = 4;

/// Upper bound on how long the bootstrap core waits for a woken core to report ready
pub const READY_TIMEOUT_MS: u32 = 1000;

/// Hardware identity of a core, always below [`MAX_CORES`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreId(u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("core id {0} is out of range, at most {MAX_CORES} cores are supported")]
pub struct CoreIdOutOfRange(pub u32);

impl CoreId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = CoreId> {
        (0..MAX_CORES as u8).map(CoreId)
    }
}

impl TryFrom<u32> for CoreId {
    type Error = CoreIdOutOfRange;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        if (id as usize) < MAX_CORES {
            Ok(CoreId(id as u8))
        } else {
            Err(CoreIdOutOfRange(id))
        }
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One slot per core. A slot is only ever touched by the core it belongs to, so its lock is
/// never contended.
pub struct PerCore<T> {
    slots: [Mutex<T>; MAX_CORES],
}

impl<T: Copy> PerCore<T> {
    pub const fn new(value: T) -> PerCore<T> {
        PerCore {
            slots: [
                Mutex::new(value),
                Mutex::new(value),
                Mutex::new(value),
                Mutex::new(value),
            ],
        }
    }
}

impl<T> PerCore<T> {
    pub fn get(&self, core: CoreId) -> MutexGuard<'_, T> {
        self.slots[core.index()].lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoreState {
    Unstarted = 0,
    Initializing = 1,
    Ready = 2,
}

pub struct CoreStates([AtomicU8; MAX_CORES]);

impl CoreStates {
    pub const fn new() -> CoreStates {
        CoreStates([const { AtomicU8::new(CoreState::Unstarted as u8) }; MAX_CORES])
    }

    pub fn get(&self, core: CoreId) -> CoreState {
        match self.0[core.index()].load(Ordering::Acquire) {
            1 => CoreState::Initializing,
            2 => CoreState::Ready,
            _ => CoreState::Unstarted,
        }
    }

    /// Publish the state of `core`. Only the core itself calls this.
    pub fn set(&self, core: CoreId, state: CoreState) {
        self.0[core.index()].store(state as u8, Ordering::Release);
    }
}

impl Default for CoreStates {
    fn default() -> Self {
        CoreStates::new()
    }
}

pub static CORE_STATES: CoreStates = CoreStates::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupState {
    NotStarted,
    WakingCore(CoreId),
    AllWoken,
}

/// The hardware half of waking a core
pub trait CoreWaker {
    /// Copy the real-mode entry code to its fixed page, done once before the first wake
    fn relocate_trampoline(&mut self);

    /// Fill the handoff record that `core` reads on its first instructions
    fn publish_handoff(&mut self, core: CoreId);

    fn send_ipi(&mut self, ipi: Ipi) -> Result<(), ApicError>;

    fn wait_ms(&mut self, msec: u32) -> Result<(), ApicError>;
}

/// Wakes every other core, one at a time, from the bootstrap core
pub struct Bringup<'a, W: CoreWaker> {
    waker: &'a mut W,
    states: &'a CoreStates,
    bootstrap: CoreId,
    state: BringupState,
}

impl<'a, W: CoreWaker> Bringup<'a, W> {
    pub fn new(waker: &'a mut W, states: &'a CoreStates, bootstrap: CoreId) -> Self {
        Self {
            waker,
            states,
            bootstrap,
            state: BringupState::NotStarted,
        }
    }

    pub fn state(&self) -> BringupState {
        self.state
    }

    /// Returns how many cores, the bootstrap core included, reported ready
    pub fn run(&mut self) -> Result<usize, ApicError> {
        self.waker.relocate_trampoline();

        let bootstrap = self.bootstrap;
        let mut ready = 1;

        for core in CoreId::all().filter(|&core| core != bootstrap) {
            self.state = BringupState::WakingCore(core);

            if self.wake(core)? {
                ready += 1;
            } else {
                println!(
                    "core {}: core {} did not report ready within {} ms",
                    bootstrap, core, READY_TIMEOUT_MS
                );
            }
        }

        self.state = BringupState::AllWoken;

        Ok(ready)
    }

    fn wake(&mut self, core: CoreId) -> Result<bool, ApicError> {
        println!("core {}: waking core {}", self.bootstrap, core);

        self.waker.publish_handoff(core);
        self.waker.send_ipi(Ipi::init(core))?;
        self.waker
            .send_ipi(Ipi::startup(core, trampoline::STARTUP_VECTOR))?;

        self.wait_until_ready(core)
    }

    fn wait_until_ready(&mut self, core: CoreId) -> Result<bool, ApicError> {
        for _ in 0..READY_TIMEOUT_MS {
            if self.states.get(core) == CoreState::Ready {
                return Ok(true);
            }

            self.waker.wait_ms(1)?;
        }

        Ok(self.states.get(core) == CoreState::Ready)
    }
}
