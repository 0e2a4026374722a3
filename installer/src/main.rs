use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use bringup_installer::install;

#[derive(Parser, Debug)]
#[command(name = "bootinstall")]
#[command(about = "Install the boot sector and a kernel payload on a disk or disk image", long_about = None)]
struct Cli {
    /// Payload written from the second sector on
    #[arg(short, long)]
    payload: PathBuf,

    /// Boot sector image, at most 512 bytes and ending with the 0xaa55 signature
    #[arg(short, long, default_value = "boot/boot.bin")]
    boot_sector: PathBuf,

    /// Report what was written
    #[arg(short, long)]
    verbose: bool,

    /// Disk, device or image file to install to
    device: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let installation = install(&cli.boot_sector, &cli.payload, &cli.device)
        .with_context(|| format!("failed to install to {}", cli.device.display()))?;

    if cli.verbose {
        let partition = &installation.partition;

        eprintln!(
            "boot sector: {} ({} bytes)",
            cli.boot_sector.display(),
            installation.boot_sector_len
        );
        eprintln!(
            "payload: {} ({} bytes, {} KiB from sector {})",
            cli.payload.display(),
            installation.payload_len,
            installation.load_info.kbsize,
            installation.load_info.index
        );
        eprintln!(
            "device: {} ({} bytes)",
            cli.device.display(),
            installation.device_len
        );
        eprintln!(
            "partition: type {:#04x}, sectors {} to {}, chs {}/{}/{} to {}/{}/{}",
            partition.kind,
            partition.start_index,
            partition.start_index + partition.numof_sectors - 1,
            partition.start.cylinder_number(),
            partition.start.head,
            partition.start.sector_number(),
            partition.end.cylinder_number(),
            partition.end.head,
            partition.end.sector_number()
        );
    }

    Ok(())
}
