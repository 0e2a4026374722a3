use thiserror::Error;

use crate::mp::{CoreId, PerCore};

use super::{
    cpu,
    idt::{self, InterruptStackFrame},
    interrupts,
    io_ports::Ports,
    ipi::Ipi,
    msr::ModelSpecificRegister,
    pic,
    pit::{Pit, TimerReference},
};

pub const LOCAL_APIC_BASE: u32 = 0xFEE0_0000;

pub const TIMER_VECTOR: u8 = 32;
pub const SPURIOUS_VECTOR: u8 = 39;

const LVT_MASKED: u32 = 1 << 16;
const LVT_NMI: u32 = 0x400;
const TIMER_ONE_SHOT: u32 = 0;
const TIMER_DIVIDE_BY_16: u32 = 3;
const SOFTWARE_ENABLE: u32 = 0x100;
const DELIVERY_PENDING: u32 = 1 << 12;

const APIC_BASE_X2APIC_ENABLE: u64 = 1 << 10;
const APIC_BASE_GLOBAL_ENABLE: u64 = 1 << 11;

/// Length of the calibration window measured on the reference timer
const CALIBRATION_MS: u16 = 16;

/// How long a pending interrupt command may stay undelivered
pub const IDLE_TIMEOUT_MS: u32 = 10;

/// Local interrupt controller ticks per millisecond, one slot per core
pub static TICKS_PER_MS: PerCore<u32> = PerCore::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum LocalApicRegister {
    TaskPriority = 0x80,
    Eoi = 0xb0,
    LogicalDestination = 0xd0,
    DestinationFormat = 0xe0,
    SpuriousVector = 0xf0,
    InterruptCommandLow = 0x300,
    InterruptCommandHigh = 0x310,
    TimerLvt = 0x320,
    ThermalLvt = 0x330,
    PerformanceLvt = 0x340,
    Lint0Lvt = 0x350,
    Lint1Lvt = 0x360,
    TimerInit = 0x380,
    TimerCurrent = 0x390,
    TimerDiv = 0x3e0,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ApicError {
    #[error("local apic is not present")]
    Absent,

    #[error("ipi target {0} is not a valid core")]
    InvalidTarget(u32),

    #[error("ipi delivery mode {0:#x} is not valid")]
    InvalidMode(u32),

    #[error("ipi destination shorthand {0:#x} is not valid")]
    InvalidShorthand(u32),

    #[error("interrupt command was not delivered within 10 ms")]
    CommandTimeout,

    #[error("local apic timer did not count during calibration")]
    Uncalibrated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalApicState {
    Uninitialized,
    Ready,
}

/// Register block of a local interrupt controller
pub trait LocalApicRegisters {
    fn read(&mut self, register: LocalApicRegister) -> u32;

    fn write(&mut self, register: LocalApicRegister, value: u32);

    fn end_of_interrupt(&mut self) {
        self.write(LocalApicRegister::Eoi, 0);
    }

    /// Halt until the armed one-shot timer has run out. Other interrupts may wake the core
    /// in between, in which case it halts again.
    fn wait_for_timer(&mut self) {
        loop {
            interrupts::disable();

            if self.read(LocalApicRegister::TimerCurrent) == 0 {
                interrupts::enable();
                return;
            }

            // `sti` holds interrupts off for one more instruction, so the expiry can not
            // slip in before `hlt`
            interrupts::enable_and_wait();
        }
    }
}

/// The memory mapped register page
#[derive(Debug, Clone, Copy)]
pub struct Mmio(usize);

impl Mmio {
    pub const fn new(base: usize) -> Mmio {
        Mmio(base)
    }
}

impl LocalApicRegisters for Mmio {
    fn read(&mut self, register: LocalApicRegister) -> u32 {
        unsafe { ((self.0 + register as usize) as *const u32).read_volatile() }
    }

    fn write(&mut self, register: LocalApicRegister, value: u32) {
        unsafe {
            ((self.0 + register as usize) as *mut u32).write_volatile(value);
        }
    }
}

/// How a wait is split into one-shot timer runs that each fit the 32-bit counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerPlan {
    pub full_spans: u32,
    pub span_ticks: u32,
    pub remainder_ticks: u32,
}

impl TimerPlan {
    /// `ticks_per_ms` must not be zero
    pub fn new(msec: u32, ticks_per_ms: u32) -> TimerPlan {
        let max_ms = u32::MAX / ticks_per_ms;

        TimerPlan {
            full_spans: msec / max_ms,
            span_ticks: max_ms * ticks_per_ms,
            remainder_ticks: (msec % max_ms) * ticks_per_ms,
        }
    }

    pub fn total_ticks(&self) -> u64 {
        self.full_spans as u64 * self.span_ticks as u64 + self.remainder_ticks as u64
    }
}

/// Value for `IA32_APIC_BASE` that enables the controller in xAPIC mode at
/// [`LOCAL_APIC_BASE`], keeping the low flag bits
pub fn apic_base_value(current: u64) -> u64 {
    (current & 0xFFF & !APIC_BASE_X2APIC_ENABLE) | APIC_BASE_GLOBAL_ENABLE | LOCAL_APIC_BASE as u64
}

pub struct LocalApic<R: LocalApicRegisters = Mmio> {
    registers: R,
    core: CoreId,
    state: LocalApicState,
    ticks_per_ms: &'static PerCore<u32>,
}

impl LocalApic<Mmio> {
    /// Find the local interrupt controller of the current core
    pub fn probe(core: CoreId) -> Result<LocalApic<Mmio>, ApicError> {
        if !cpu::has_local_apic() {
            return Err(ApicError::Absent);
        }

        Ok(LocalApic::new(
            Mmio::new(LOCAL_APIC_BASE as usize),
            core,
            &TICKS_PER_MS,
        ))
    }

    /// Bring the controller to the ready state. Masks the legacy controller, programs the
    /// local vector table, calibrates the timer against the PIT and enables the controller.
    pub fn init(&mut self) -> Result<(), ApicError> {
        idt::init();

        pic::disable();

        idt::install(SPURIOUS_VECTOR, handle_spurious);
        self.configure();

        idt::install(TIMER_VECTOR, handle_timer);
        let ticks_per_ms = self.calibrate(&mut Pit::new(Ports))?;

        let apic_base = ModelSpecificRegister::ApicBase.read();
        ModelSpecificRegister::ApicBase.write(apic_base_value(apic_base));

        self.state = LocalApicState::Ready;

        println!(
            "core {}: local apic ready, {} ticks per ms",
            self.core, ticks_per_ms
        );

        Ok(())
    }
}

impl<R: LocalApicRegisters> LocalApic<R> {
    pub fn new(registers: R, core: CoreId, ticks_per_ms: &'static PerCore<u32>) -> Self {
        Self {
            registers,
            core,
            state: LocalApicState::Uninitialized,
            ticks_per_ms,
        }
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    pub fn state(&self) -> LocalApicState {
        self.state
    }

    pub fn ticks_per_ms(&self) -> u32 {
        *self.ticks_per_ms.get(self.core)
    }

    /// Program the local vector table: timer and local interrupt lines masked, thermal and
    /// performance events as NMI, accept every priority, spurious vector set
    pub fn configure(&mut self) {
        use LocalApicRegister::*;

        self.registers.write(DestinationFormat, 0xFFFF_FFFF);
        let logical_destination = self.registers.read(LogicalDestination);
        self.registers
            .write(LogicalDestination, logical_destination & 0x00FF_FFFF);

        self.registers.write(TimerLvt, LVT_MASKED);
        self.registers.write(ThermalLvt, LVT_NMI);
        self.registers.write(PerformanceLvt, LVT_NMI);
        self.registers.write(Lint0Lvt, LVT_MASKED);
        self.registers.write(Lint1Lvt, LVT_MASKED);

        self.registers.write(TaskPriority, 0);

        self.registers
            .write(SpuriousVector, SOFTWARE_ENABLE | SPURIOUS_VECTOR as u32);
    }

    /// Measure the timer against `reference` and store the result in this core's slot
    pub fn calibrate(&mut self, reference: &mut impl TimerReference) -> Result<u32, ApicError> {
        use LocalApicRegister::*;

        self.registers.write(TimerLvt, LVT_MASKED);
        self.registers.write(TimerDiv, TIMER_DIVIDE_BY_16);
        self.registers.write(TimerInit, u32::MAX);

        reference.wait_ms(CALIBRATION_MS);

        let elapsed = u32::MAX - self.registers.read(TimerCurrent);

        self.registers.write(TimerLvt, LVT_MASKED);

        let ticks_per_ms = elapsed / CALIBRATION_MS as u32;

        if ticks_per_ms == 0 {
            return Err(ApicError::Uncalibrated);
        }

        *self.ticks_per_ms.get(self.core) = ticks_per_ms;

        Ok(ticks_per_ms)
    }

    fn run_one_shot(&mut self, ticks: u32) {
        use LocalApicRegister::*;

        self.registers.write(TimerLvt, LVT_MASKED);
        self.registers.write(TimerDiv, TIMER_DIVIDE_BY_16);
        self.registers
            .write(TimerLvt, TIMER_VECTOR as u32 | TIMER_ONE_SHOT);
        self.registers.write(TimerInit, ticks);

        self.registers.wait_for_timer();
    }

    /// Halt this core for `msec` milliseconds
    pub fn wait_ms(&mut self, msec: u32) -> Result<(), ApicError> {
        let ticks_per_ms = self.ticks_per_ms();

        if ticks_per_ms == 0 {
            return Err(ApicError::Uncalibrated);
        }

        let plan = TimerPlan::new(msec, ticks_per_ms);

        for _ in 0..plan.full_spans {
            self.run_one_shot(plan.span_ticks);
        }

        if plan.remainder_ticks != 0 {
            self.run_one_shot(plan.remainder_ticks);
        }

        Ok(())
    }

    fn is_idle(&mut self) -> bool {
        self.registers.read(LocalApicRegister::InterruptCommandLow) & DELIVERY_PENDING == 0
    }

    fn wait_for_idle(&mut self) -> Result<(), ApicError> {
        for _ in 0..IDLE_TIMEOUT_MS {
            if self.is_idle() {
                return Ok(());
            }

            self.wait_ms(1)?;
        }

        if self.is_idle() {
            Ok(())
        } else {
            Err(ApicError::CommandTimeout)
        }
    }

    pub fn send(&mut self, ipi: Ipi) -> Result<(), ApicError> {
        self.wait_for_idle()?;

        self.registers
            .write(LocalApicRegister::InterruptCommandHigh, ipi.destination());
        self.registers
            .write(LocalApicRegister::InterruptCommandLow, ipi.command());

        self.wait_for_idle()
    }

    /// Validate the raw command fields, then send. Nothing is written when validation fails.
    pub fn send_ipi(&mut self, target: u32, shorthand: u32, mode: u32, vector: u8) -> Result<(), ApicError> {
        let ipi = Ipi::from_raw(target, shorthand, mode, vector)?;

        self.send(ipi)
    }
}

extern "x86-interrupt" fn handle_timer(_: InterruptStackFrame) {
    Mmio::new(LOCAL_APIC_BASE as usize).end_of_interrupt();
}

extern "x86-interrupt" fn handle_spurious(_: InterruptStackFrame) {
    println!("*** core {}: spurious apic interrupt (ignored) ***", cpu::apic_id());
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::mp::MAX_CORES;

    use LocalApicRegister::*;

    #[derive(Default)]
    struct FakeRegisters {
        values: HashMap<LocalApicRegister, u32>,
        reads: Vec<LocalApicRegister>,
        writes: Vec<(LocalApicRegister, u32)>,
        /// Ticks the timer counts down between arming and reading the current count
        elapsed: u32,
        /// Number of polls that still see a command pending
        busy_polls: u32,
        expiries: u32,
    }

    impl FakeRegisters {
        fn writes_to(&self, register: LocalApicRegister) -> Vec<u32> {
            self.writes
                .iter()
                .filter(|(to, _)| *to == register)
                .map(|(_, value)| *value)
                .collect()
        }
    }

    impl LocalApicRegisters for FakeRegisters {
        fn read(&mut self, register: LocalApicRegister) -> u32 {
            self.reads.push(register);

            match register {
                TimerCurrent => self
                    .values
                    .get(&TimerInit)
                    .copied()
                    .unwrap_or(0)
                    .saturating_sub(self.elapsed),

                InterruptCommandLow if self.busy_polls > 0 => {
                    self.busy_polls -= 1;
                    DELIVERY_PENDING
                }

                InterruptCommandLow => 0,

                _ => self.values.get(&register).copied().unwrap_or(0),
            }
        }

        fn write(&mut self, register: LocalApicRegister, value: u32) {
            self.writes.push((register, value));
            self.values.insert(register, value);
        }

        fn wait_for_timer(&mut self) {
            self.expiries += 1;
        }
    }

    struct FakeReference {
        waited: Vec<u16>,
    }

    impl TimerReference for FakeReference {
        fn wait_ms(&mut self, msec: u16) {
            self.waited.push(msec);
        }
    }

    fn core(id: u32) -> CoreId {
        CoreId::try_from(id).unwrap()
    }

    fn slots() -> &'static PerCore<u32> {
        Box::leak(Box::new(PerCore::new(0)))
    }

    fn calibrated(ticks_per_ms: u32) -> LocalApic<FakeRegisters> {
        let slots = slots();
        *slots.get(core(1)) = ticks_per_ms;

        LocalApic::new(FakeRegisters::default(), core(1), slots)
    }

    #[test]
    fn configure_programs_the_vector_table() {
        let mut registers = FakeRegisters::default();
        registers.values.insert(LogicalDestination, 0xAB12_3456);

        let mut apic = LocalApic::new(registers, core(0), slots());
        apic.configure();

        assert_eq!(
            apic.registers.writes,
            [
                (DestinationFormat, 0xFFFF_FFFF),
                (LogicalDestination, 0x0012_3456),
                (TimerLvt, 0x10000),
                (ThermalLvt, 0x400),
                (PerformanceLvt, 0x400),
                (Lint0Lvt, 0x10000),
                (Lint1Lvt, 0x10000),
                (TaskPriority, 0),
                (SpuriousVector, 0x127),
            ]
        );
    }

    #[test]
    fn calibration_fills_only_the_own_slot() {
        let slots = slots();
        let mut registers = FakeRegisters::default();
        registers.elapsed = 16 * 25_000 + 7;

        let mut apic = LocalApic::new(registers, core(2), slots);
        let mut reference = FakeReference { waited: Vec::new() };

        assert_eq!(apic.calibrate(&mut reference), Ok(25_000));
        assert_eq!(reference.waited, [16]);
        assert_eq!(apic.ticks_per_ms(), 25_000);

        for other in CoreId::all().filter(|&other| other != core(2)) {
            assert_eq!(*slots.get(other), 0);
        }

        assert_eq!(
            apic.registers.writes,
            [
                (TimerLvt, 0x10000),
                (TimerDiv, 3),
                (TimerInit, 0xFFFF_FFFF),
                (TimerLvt, 0x10000),
            ]
        );
    }

    #[test]
    fn calibration_rejects_a_stopped_timer() {
        let slots = slots();
        let mut apic = LocalApic::new(FakeRegisters::default(), core(0), slots);

        assert_eq!(
            apic.calibrate(&mut FakeReference { waited: Vec::new() }),
            Err(ApicError::Uncalibrated)
        );
        assert_eq!(*slots.get(core(0)), 0);
    }

    #[test]
    fn long_waits_split_into_full_spans() {
        let plan = TimerPlan::new(40, 0x1000_0000);

        assert_eq!(
            plan,
            TimerPlan {
                full_spans: 2,
                span_ticks: 15 * 0x1000_0000,
                remainder_ticks: 10 * 0x1000_0000,
            }
        );
        assert_eq!(plan.total_ticks(), 40 * 0x1000_0000);
    }

    #[test]
    fn plan_totals_match_for_exact_multiples() {
        let plan = TimerPlan::new(30, 0x1000_0000);

        assert_eq!(plan.full_spans, 2);
        assert_eq!(plan.remainder_ticks, 0);
        assert_eq!(plan.total_ticks(), 30 * 0x1000_0000);
    }

    #[test]
    fn wait_zero_ms_arms_nothing() {
        let mut apic = calibrated(1000);

        apic.wait_ms(0).unwrap();

        assert!(apic.registers.writes.is_empty());
        assert_eq!(apic.registers.expiries, 0);
    }

    #[test]
    fn wait_arms_one_shot_with_divider_before_count() {
        let mut apic = calibrated(1000);

        apic.wait_ms(5).unwrap();

        assert_eq!(
            apic.registers.writes,
            [
                (TimerLvt, 0x10000),
                (TimerDiv, 3),
                (TimerLvt, 32),
                (TimerInit, 5000),
            ]
        );
        assert_eq!(apic.registers.expiries, 1);
    }

    #[test]
    fn long_wait_arms_every_span() {
        let mut apic = calibrated(0x1000_0000);

        apic.wait_ms(40).unwrap();

        assert_eq!(
            apic.registers.writes_to(TimerInit),
            [0xF000_0000, 0xF000_0000, 0xA000_0000]
        );
        assert_eq!(apic.registers.expiries, 3);
    }

    #[test]
    fn wait_before_calibration_fails() {
        let mut apic = LocalApic::new(FakeRegisters::default(), core(0), slots());

        assert_eq!(apic.wait_ms(1), Err(ApicError::Uncalibrated));
        assert!(apic.registers.writes.is_empty());
    }

    #[test]
    fn send_writes_destination_before_command() {
        let mut apic = calibrated(1000);

        apic.send(Ipi::startup(core(3), 8)).unwrap();

        assert_eq!(
            apic.registers.writes,
            [(InterruptCommandHigh, 0x0300_0000), (InterruptCommandLow, 0x4608)]
        );
    }

    #[test]
    fn invalid_arguments_touch_no_register() {
        let mut apic = calibrated(1000);

        assert_eq!(
            apic.send_ipi(MAX_CORES as u32, 0, 0x500, 0),
            Err(ApicError::InvalidTarget(MAX_CORES as u32))
        );
        assert_eq!(
            apic.send_ipi(1, 0, 0x700, 0),
            Err(ApicError::InvalidMode(0x700))
        );
        assert_eq!(
            apic.send_ipi(1, 0x10000, 0x500, 0),
            Err(ApicError::InvalidShorthand(0x10000))
        );

        assert!(apic.registers.reads.is_empty());
        assert!(apic.registers.writes.is_empty());
    }

    #[test]
    fn pending_command_is_polled_each_millisecond() {
        let mut apic = calibrated(1000);
        apic.registers.busy_polls = 3;

        apic.send_ipi(1, 0, 0x500, 0).unwrap();

        assert_eq!(apic.registers.writes_to(TimerInit), [1000, 1000, 1000]);
        assert_eq!(apic.registers.writes_to(InterruptCommandLow), [0x4500]);
    }

    #[test]
    fn stuck_command_times_out() {
        let mut apic = calibrated(1000);
        apic.registers.busy_polls = u32::MAX;

        assert_eq!(apic.send(Ipi::init(core(1))), Err(ApicError::CommandTimeout));
        assert_eq!(apic.registers.expiries, IDLE_TIMEOUT_MS);
        assert!(apic.registers.writes_to(InterruptCommandLow).is_empty());
    }

    #[test]
    fn apic_base_enables_xapic_at_the_fixed_base() {
        assert_eq!(apic_base_value(0xFEE0_0D00), 0xFEE0_0900);
        assert_eq!(apic_base_value(0x1234_5100), 0xFEE0_0900);
        assert_eq!(apic_base_value(0), 0xFEE0_0800);
    }

    #[test]
    fn end_of_interrupt_writes_zero() {
        let mut apic = calibrated(1000);

        apic.registers.end_of_interrupt();

        assert_eq!(apic.registers.writes, [(Eoi, 0)]);
    }
}
