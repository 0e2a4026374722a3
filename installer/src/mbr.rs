//! Layout of the first sector as the boot sector expects to find it after installation

use thiserror::Error;

pub const SECTOR_SIZE: u64 = 512;

/// Protected mode entry of the boot sector, part of the boot code itself
pub const STARTUP_VECTOR_OFFSET: usize = 424;
pub const LOAD_INFO_OFFSET: usize = 432;
pub const PARTITION_TABLE_OFFSET: usize = 446;
pub const SIGNATURE_OFFSET: usize = 510;
pub const SIGNATURE: u16 = 0xAA55;

/// The payload always starts right after the boot sector
pub const PAYLOAD_INDEX: u32 = 1;
pub const PAYLOAD_KBALIGN: u8 = 4;

/// Linux native, what the partition entry claims to be
pub const PARTITION_TYPE: u8 = 0x83;

/// Largest span the partition entry maps, in bytes
pub const MAX_PARTITION_BYTES: u64 = 0x1000_0000;

pub const SECTORS_PER_TRACK: u32 = 63;
pub const HEADS_PER_CYLINDER: u32 = 255;
pub const MAX_CYLINDER: u32 = 1023;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MbrError {
    #[error("boot sector is {0} bytes, it must fit in one 512 byte sector")]
    BootSectorTooLarge(usize),
    #[error("boot sector does not end with the 0xaa55 signature")]
    MissingSignature,
    #[error("payload of {0} bytes does not fit the load descriptor")]
    PayloadTooLarge(u64),
    #[error("device holds {device} bytes, {needed} are needed")]
    DeviceTooSmall { device: u64, needed: u64 },
}

/// Check a boot sector image before anything is written
pub fn check_boot_sector(bytes: &[u8]) -> Result<(), MbrError> {
    if bytes.len() > SECTOR_SIZE as usize {
        return Err(MbrError::BootSectorTooLarge(bytes.len()));
    }

    match bytes.get(SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2) {
        Some(signature) if signature == SIGNATURE.to_le_bytes() => Ok(()),
        _ => Err(MbrError::MissingSignature),
    }
}

/// Where the boot sector finds the payload and how much of it to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadInfo {
    pub index: u32,
    pub kbsize: u16,
    pub kbalign: u8,
}

impl LoadInfo {
    pub const SIZE: usize = 8;

    pub fn for_payload(payload_len: u64) -> Result<LoadInfo, MbrError> {
        let kbsize = u16::try_from(payload_len.div_ceil(1024))
            .map_err(|_| MbrError::PayloadTooLarge(payload_len))?;

        Ok(LoadInfo {
            index: PAYLOAD_INDEX,
            kbsize,
            kbalign: PAYLOAD_KBALIGN,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];

        bytes[0..4].copy_from_slice(&self.index.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.kbsize.to_le_bytes());
        bytes[6] = self.kbalign;

        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> LoadInfo {
        LoadInfo {
            index: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            kbsize: u16::from_le_bytes([bytes[4], bytes[5]]),
            kbalign: bytes[6],
        }
    }
}

/// Cylinder, head and sector address, kept in its three byte on-disk form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chs {
    pub head: u8,
    /// Sector number in bits 0..6, cylinder bits 8..10 in bits 6..8
    pub sector: u8,
    /// Low eight bits of the cylinder
    pub cylinder: u8,
}

impl Chs {
    /// Addresses past the last cylinder saturate to the last addressable sector
    pub fn from_lba(lba: u32) -> Chs {
        let track = lba / SECTORS_PER_TRACK;
        let cylinder = track / HEADS_PER_CYLINDER;

        let (cylinder, head, sector) = if cylinder > MAX_CYLINDER {
            (MAX_CYLINDER, HEADS_PER_CYLINDER - 1, SECTORS_PER_TRACK)
        } else {
            (cylinder, track % HEADS_PER_CYLINDER, lba % SECTORS_PER_TRACK + 1)
        };

        Chs {
            head: head as u8,
            sector: sector as u8 | (((cylinder >> 8) & 0x3) << 6) as u8,
            cylinder: cylinder as u8,
        }
    }

    pub fn cylinder_number(&self) -> u16 {
        (((self.sector & 0xC0) as u16) << 2) | self.cylinder as u16
    }

    pub fn sector_number(&self) -> u8 {
        self.sector & 0x3F
    }

    pub fn to_bytes(&self) -> [u8; 3] {
        [self.head, self.sector, self.cylinder]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    pub status: u8,
    pub start: Chs,
    pub kind: u8,
    pub end: Chs,
    pub start_index: u32,
    pub numof_sectors: u32,
}

impl PartitionEntry {
    pub const SIZE: usize = 16;

    /// The single partition covering everything after the boot sector, up to the cap
    pub fn spanning(device_len: u64) -> Result<PartitionEntry, MbrError> {
        if device_len <= SECTOR_SIZE {
            return Err(MbrError::DeviceTooSmall {
                device: device_len,
                needed: SECTOR_SIZE + 1,
            });
        }

        let mapped = (device_len - SECTOR_SIZE).min(MAX_PARTITION_BYTES);
        let numof_sectors = mapped.div_ceil(SECTOR_SIZE) as u32;
        let start_index = PAYLOAD_INDEX;

        Ok(PartitionEntry {
            status: 0,
            start: Chs::from_lba(start_index),
            kind: PARTITION_TYPE,
            end: Chs::from_lba(start_index + numof_sectors - 1),
            start_index,
            numof_sectors,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];

        bytes[0] = self.status;
        bytes[1..4].copy_from_slice(&self.start.to_bytes());
        bytes[4] = self.kind;
        bytes[5..8].copy_from_slice(&self.end.to_bytes());
        bytes[8..12].copy_from_slice(&self.start_index.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.numof_sectors.to_le_bytes());

        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> PartitionEntry {
        PartitionEntry {
            status: bytes[0],
            start: Chs {
                head: bytes[1],
                sector: bytes[2],
                cylinder: bytes[3],
            },
            kind: bytes[4],
            end: Chs {
                head: bytes[5],
                sector: bytes[6],
                cylinder: bytes[7],
            },
            start_index: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            numof_sectors: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }
}
