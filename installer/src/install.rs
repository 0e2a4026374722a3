use std::{
    fs::{self, File, OpenOptions},
    io::{self, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::mbr::{
    self, LOAD_INFO_OFFSET, LoadInfo, MbrError, PARTITION_TABLE_OFFSET, PartitionEntry,
    SECTOR_SIZE,
};

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: is a directory", .0.display())]
    IsDirectory(PathBuf),
    #[error("{}: not a regular file or a device", .0.display())]
    UnsupportedFileType(PathBuf),
    #[error(transparent)]
    Layout(#[from] MbrError),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> InstallError + '_ {
    move |source| InstallError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What was written, for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Installation {
    pub device_len: u64,
    pub boot_sector_len: usize,
    pub payload_len: u64,
    pub load_info: LoadInfo,
    pub partition: PartitionEntry,
}

/// Regular files and devices are accepted, anything else is refused before it is opened
pub fn check_file_type(path: &Path) -> Result<(), InstallError> {
    let metadata = fs::metadata(path).map_err(io_error(path))?;
    let file_type = metadata.file_type();

    if file_type.is_dir() {
        return Err(InstallError::IsDirectory(path.to_path_buf()));
    }

    if file_type.is_file() || is_device(&file_type) {
        Ok(())
    } else {
        Err(InstallError::UnsupportedFileType(path.to_path_buf()))
    }
}

#[cfg(unix)]
fn is_device(file_type: &fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;

    file_type.is_block_device() || file_type.is_char_device()
}

#[cfg(not(unix))]
fn is_device(_file_type: &fs::FileType) -> bool {
    false
}

fn write_at(device: &mut File, path: &Path, offset: u64, bytes: &[u8]) -> Result<(), InstallError> {
    device
        .seek(SeekFrom::Start(offset))
        .and_then(|_| device.write_all(bytes))
        .map_err(io_error(path))
}

/// Write the boot sector at sector 0, the payload from sector 1 on, then patch the load
/// descriptor and the first partition entry into sector 0
pub fn install(
    boot_sector: &Path,
    payload: &Path,
    device: &Path,
) -> Result<Installation, InstallError> {
    check_file_type(boot_sector)?;
    check_file_type(payload)?;
    check_file_type(device)?;

    let boot_bytes = fs::read(boot_sector).map_err(io_error(boot_sector))?;
    mbr::check_boot_sector(&boot_bytes)?;

    let payload_bytes = fs::read(payload).map_err(io_error(payload))?;
    let payload_len = payload_bytes.len() as u64;
    let load_info = LoadInfo::for_payload(payload_len)?;

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(device)
        .map_err(io_error(device))?;

    // Works for block devices too, where the metadata length is zero
    let device_len = file.seek(SeekFrom::End(0)).map_err(io_error(device))?;

    let needed = SECTOR_SIZE + payload_len;
    if device_len < needed {
        return Err(MbrError::DeviceTooSmall {
            device: device_len,
            needed,
        }
        .into());
    }

    let partition = PartitionEntry::spanning(device_len)?;

    write_at(&mut file, device, 0, &boot_bytes)?;
    write_at(&mut file, device, SECTOR_SIZE, &payload_bytes)?;
    write_at(&mut file, device, LOAD_INFO_OFFSET as u64, &load_info.to_bytes())?;
    write_at(
        &mut file,
        device,
        PARTITION_TABLE_OFFSET as u64,
        &partition.to_bytes(),
    )?;

    file.flush().map_err(io_error(device))?;

    Ok(Installation {
        device_len,
        boot_sector_len: boot_bytes.len(),
        payload_len,
        load_info,
        partition,
    })
}
