use crate::mp::CoreId;

use super::local_apic::ApicError;

/// Delivery mode, bits 8..11 of the interrupt command register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IpiMode {
    Fixed = 0x000,
    Smi = 0x200,
    Nmi = 0x400,
    Init = 0x500,
    Startup = 0x600,
}

impl TryFrom<u32> for IpiMode {
    type Error = ApicError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x000 => Ok(IpiMode::Fixed),
            0x200 => Ok(IpiMode::Smi),
            0x400 => Ok(IpiMode::Nmi),
            0x500 => Ok(IpiMode::Init),
            0x600 => Ok(IpiMode::Startup),
            _ => Err(ApicError::InvalidMode(value)),
        }
    }
}

/// Destination shorthand, bits 18..20 of the interrupt command register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IpiShorthand {
    None = 0x00000,
    SelfOnly = 0x40000,
    All = 0x80000,
    AllExcludingSelf = 0xC0000,
}

impl TryFrom<u32> for IpiShorthand {
    type Error = ApicError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x00000 => Ok(IpiShorthand::None),
            0x40000 => Ok(IpiShorthand::SelfOnly),
            0x80000 => Ok(IpiShorthand::All),
            0xC0000 => Ok(IpiShorthand::AllExcludingSelf),
            _ => Err(ApicError::InvalidShorthand(value)),
        }
    }
}

/// Level assert, bit 14. Destination mode (bit 11) stays clear, which means physical.
const LEVEL_ASSERT: u32 = 1 << 14;

/// A validated inter-processor interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipi {
    target: CoreId,
    shorthand: IpiShorthand,
    mode: IpiMode,
    vector: u8,
}

impl Ipi {
    pub const fn new(target: CoreId, shorthand: IpiShorthand, mode: IpiMode, vector: u8) -> Self {
        Self {
            target,
            shorthand,
            mode,
            vector,
        }
    }

    /// Validate raw command fields, rejecting anything the controller must never see
    pub fn from_raw(target: u32, shorthand: u32, mode: u32, vector: u8) -> Result<Self, ApicError> {
        let target = CoreId::try_from(target).map_err(|error| ApicError::InvalidTarget(error.0))?;

        Ok(Self::new(
            target,
            IpiShorthand::try_from(shorthand)?,
            IpiMode::try_from(mode)?,
            vector,
        ))
    }

    /// Put `target` into its wait-for-startup state
    pub const fn init(target: CoreId) -> Self {
        Self::new(target, IpiShorthand::None, IpiMode::Init, 0)
    }

    /// Start `target` in real mode at physical address `vector << 12`
    pub const fn startup(target: CoreId, vector: u8) -> Self {
        Self::new(target, IpiShorthand::None, IpiMode::Startup, vector)
    }

    pub fn target(&self) -> CoreId {
        self.target
    }

    pub fn shorthand(&self) -> IpiShorthand {
        self.shorthand
    }

    pub fn mode(&self) -> IpiMode {
        self.mode
    }

    pub fn vector(&self) -> u8 {
        self.vector
    }

    /// Value of the high half of the interrupt command register
    pub fn destination(&self) -> u32 {
        (self.target.as_u8() as u32) << 24
    }

    /// Value of the low half of the interrupt command register, writing it sends the interrupt
    pub fn command(&self) -> u32 {
        self.shorthand as u32 | LEVEL_ASSERT | self.mode as u32 | self.vector as u32
    }
}
