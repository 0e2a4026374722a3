use std::{
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
    process::Command,
};

use bringup_installer::{
    InstallError, install,
    mbr::{
        LOAD_INFO_OFFSET, LoadInfo, MbrError, PARTITION_TABLE_OFFSET, PartitionEntry,
        SIGNATURE_OFFSET,
    },
};
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    boot_sector: PathBuf,
    payload: PathBuf,
    device: PathBuf,
}

impl Fixture {
    fn new(payload_len: usize, device_len: u64) -> Fixture {
        let dir = TempDir::new().unwrap();

        let mut boot = vec![0xEB; 512];
        boot[SIGNATURE_OFFSET] = 0x55;
        boot[SIGNATURE_OFFSET + 1] = 0xAA;

        let boot_sector = dir.path().join("boot.bin");
        fs::write(&boot_sector, &boot).unwrap();

        let payload = dir.path().join("kernel.bin");
        fs::write(&payload, (0..payload_len).map(|i| i as u8).collect::<Vec<_>>()).unwrap();

        let device = dir.path().join("disk.img");
        File::create(&device).unwrap().set_len(device_len).unwrap();

        Fixture {
            dir,
            boot_sector,
            payload,
            device,
        }
    }

    fn install(&self) -> Result<bringup_installer::Installation, InstallError> {
        install(&self.boot_sector, &self.payload, &self.device)
    }

    fn first_sector(&self) -> Vec<u8> {
        let mut bytes = vec![0; 512];
        File::open(&self.device)
            .unwrap()
            .read_exact(&mut bytes)
            .unwrap();
        bytes
    }
}

fn load_info(sector: &[u8]) -> LoadInfo {
    LoadInfo::from_bytes(sector[LOAD_INFO_OFFSET..LOAD_INFO_OFFSET + 8].try_into().unwrap())
}

fn partition(sector: &[u8]) -> PartitionEntry {
    PartitionEntry::from_bytes(
        sector[PARTITION_TABLE_OFFSET..PARTITION_TABLE_OFFSET + 16]
            .try_into()
            .unwrap(),
    )
}

#[test]
fn installs_a_small_payload() {
    let fixture = Fixture::new(513, 1024 * 1024);

    let installation = fixture.install().unwrap();

    assert_eq!(installation.load_info.kbsize, 1);
    assert_eq!(installation.partition.numof_sectors, 2047);

    let disk = fs::read(&fixture.device).unwrap();
    let sector = fixture.first_sector();

    assert_eq!(disk.len(), 1024 * 1024);
    assert_eq!(&sector[SIGNATURE_OFFSET..], &[0x55, 0xAA]);
    assert_eq!(&sector[..8], &[0xEB; 8]);
    assert_eq!(
        &sector[LOAD_INFO_OFFSET..LOAD_INFO_OFFSET + 8],
        &[1, 0, 0, 0, 1, 0, 4, 0]
    );
    assert_eq!(load_info(&sector), installation.load_info);
    assert_eq!(partition(&sector), installation.partition);
    assert_eq!(partition(&sector).kind, 0x83);
    assert_eq!(partition(&sector).start_index, 1);

    // the payload is copied verbatim from the second sector on
    assert_eq!(disk[512], 0);
    assert_eq!(disk[512 + 255], 255);
    assert_eq!(disk[512 + 512], 0);
    assert_eq!(disk[512 + 513], 0);
}

#[test]
fn partition_is_capped_on_large_devices() {
    let fixture = Fixture::new(4096, 300 * 1024 * 1024);

    fixture.install().unwrap();

    assert_eq!(partition(&fixture.first_sector()).numof_sectors, 0x8_0000);
}

#[test]
fn device_must_hold_the_payload() {
    let fixture = Fixture::new(4096, 2048);

    let error = fixture.install().unwrap_err();

    assert!(matches!(
        error,
        InstallError::Layout(MbrError::DeviceTooSmall {
            device: 2048,
            needed: 4608
        })
    ));
    assert!(fs::read(&fixture.device).unwrap().iter().all(|byte| *byte == 0));
}

#[test]
fn directories_are_refused() {
    let fixture = Fixture::new(16, 4096);
    let directory = fixture.dir.path().join("not-a-disk");
    fs::create_dir(&directory).unwrap();

    let error = install(&fixture.boot_sector, &fixture.payload, &directory).unwrap_err();

    assert!(matches!(error, InstallError::IsDirectory(path) if path == directory));
}

#[test]
fn missing_payload_is_an_io_error() {
    let fixture = Fixture::new(16, 4096);
    let missing = fixture.dir.path().join("missing.bin");

    let error = install(&fixture.boot_sector, &missing, &fixture.device).unwrap_err();

    assert!(matches!(error, InstallError::Io { path, .. } if path == missing));
}

#[test]
fn unsigned_boot_sector_is_refused() {
    let fixture = Fixture::new(16, 4096);
    fs::write(&fixture.boot_sector, [0u8; 512]).unwrap();

    let error = fixture.install().unwrap_err();

    assert!(matches!(
        error,
        InstallError::Layout(MbrError::MissingSignature)
    ));
}

fn bootinstall(args: &[&Path]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_bootinstall"))
        .args(args)
        .output()
        .unwrap()
}

#[test]
fn cli_installs_and_exits_zero() {
    let fixture = Fixture::new(513, 1024 * 1024);

    let output = bootinstall(&[
        Path::new("-v"),
        Path::new("-b"),
        &fixture.boot_sector,
        Path::new("-p"),
        &fixture.payload,
        &fixture.device,
    ]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("partition: type 0x83"));
    assert_eq!(load_info(&fixture.first_sector()).kbsize, 1);
}

#[test]
fn cli_reports_failures() {
    let fixture = Fixture::new(16, 4096);

    let output = bootinstall(&[
        Path::new("--boot-sector"),
        &fixture.boot_sector,
        Path::new("--payload"),
        &fixture.payload,
        fixture.dir.path(),
    ]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("is a directory"));
}

#[test]
fn cli_requires_a_payload() {
    let fixture = Fixture::new(16, 4096);

    let output = bootinstall(&[&fixture.device]);

    assert!(!output.status.success());
}
