use thiserror::Error;

use super::io_ports::PortIo;

pub const CHANNEL_0_DATA_PORT: u16 = 0x40;
pub const COMMAND_PORT: u16 = 0x43;

/// System control port B, which gates channel 2 and exposes its output
pub const SYSTEM_CONTROL_PORT: u16 = 0x61;

const CHANNEL_2_GATE: u8 = 1 << 0;
const SPEAKER_DATA: u8 = 1 << 1;
const CHANNEL_2_OUTPUT: u8 = 1 << 5;

/// Count of the 1.193182 MHz input clock in one millisecond
pub const TICKS_PER_MS: u16 = 0x4a9;

/// Interrupt on terminal count: the output goes low on load and high when the count expires
pub const MODE_INTERRUPT_ON_TERMINAL_COUNT: u8 = 0;

const ACCESS_LOW_THEN_HIGH: u8 = 0x30;
const READ_BACK_STATUS: u8 = 0xe0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PitError {
    #[error("pit channel {0} can not be programmed")]
    InvalidChannel(u8),

    #[error("pit mode {0} does not exist")]
    InvalidMode(u8),
}

/// A clock that can busy-wait for whole milliseconds without any calibration
pub trait TimerReference {
    fn wait_ms(&mut self, msec: u16);
}

/// The 8254 programmable interval timer. Channel 1 is left alone since it may be wired to
/// memory refresh.
pub struct Pit<P: PortIo> {
    ports: P,
}

impl<P: PortIo> Pit<P> {
    pub const fn new(ports: P) -> Self {
        Self { ports }
    }

    fn check_channel(channel: u8) -> Result<(), PitError> {
        if channel == 1 || channel > 2 {
            return Err(PitError::InvalidChannel(channel));
        }

        Ok(())
    }

    /// Load `value` into `channel`, counting in `mode`
    pub fn write(&mut self, channel: u8, mode: u8, value: u16) -> Result<(), PitError> {
        Self::check_channel(channel)?;

        if mode > 5 {
            return Err(PitError::InvalidMode(mode));
        }

        self.program(channel, mode, value);

        Ok(())
    }

    fn program(&mut self, channel: u8, mode: u8, value: u16) {
        self.ports
            .write(COMMAND_PORT, (channel << 6) | ACCESS_LOW_THEN_HIGH | (mode << 1));

        self.ports
            .write(CHANNEL_0_DATA_PORT + channel as u16, value as u8);
        self.ports
            .write(CHANNEL_0_DATA_PORT + channel as u16, (value >> 8) as u8);
    }

    /// Latch and read the current count of `channel`
    pub fn read(&mut self, channel: u8) -> Result<u16, PitError> {
        Self::check_channel(channel)?;

        self.ports.write(COMMAND_PORT, channel << 6);

        let low = self.ports.read(CHANNEL_0_DATA_PORT + channel as u16);
        let high = self.ports.read(CHANNEL_0_DATA_PORT + channel as u16);

        Ok(((high as u16) << 8) | low as u16)
    }

    /// Read back the status byte of `channel`
    pub fn status(&mut self, channel: u8) -> Result<u8, PitError> {
        Self::check_channel(channel)?;

        self.ports
            .write(COMMAND_PORT, READ_BACK_STATUS | (1 << (channel + 1)));

        Ok(self.ports.read(CHANNEL_0_DATA_PORT + channel as u16))
    }

    fn wait_one_ms(&mut self) {
        let control = self.ports.read(SYSTEM_CONTROL_PORT) & !(SPEAKER_DATA | CHANNEL_2_GATE);
        self.ports.write(SYSTEM_CONTROL_PORT, control);

        self.program(2, MODE_INTERRUPT_ON_TERMINAL_COUNT, TICKS_PER_MS);

        self.ports
            .write(SYSTEM_CONTROL_PORT, control | CHANNEL_2_GATE);

        while self.ports.read(SYSTEM_CONTROL_PORT) & CHANNEL_2_OUTPUT == 0 {
            core::hint::spin_loop();
        }
    }
}

impl<P: PortIo> TimerReference for Pit<P> {
    fn wait_ms(&mut self, msec: u16) {
        for _ in 0..msec {
            self.wait_one_ms();
        }
    }
}
