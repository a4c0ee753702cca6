// src/main.rs
use anyhow::Context;
use clap::{ArgAction, Parser};
use env_logger::Builder;
use log::{info, LevelFilter};
use std::io::{self, Write};
use zeroize::Zeroizing;

mod cipher;
mod device;
mod error;
mod queue;
mod transfer;

use cipher::AesChunkCipher;
use device::{Device, DeviceConfig};

#[derive(Parser)]
#[command(name = "cipherdisk")]
#[command(version = "1.0.0")]
#[command(
    about = "Encrypted in-memory virtual block device",
    long_about = "cipherdisk creates a volatile block device that encrypts every sector it \
stores and decrypts every sector it returns, serving requests through a serialized \
dispatch queue. All contents are lost on teardown."
)]
struct Cli {
    /// Device capacity in sectors.
    #[arg(long, default_value_t = 1024, value_parser = clap::value_parser!(u64).range(1..))]
    capacity_sectors: u64,

    /// Sector size in bytes. Must be a multiple of the 16 byte cipher chunk.
    #[arg(long, default_value_t = 512)]
    block_size: usize,

    /// Device name prefix; the registry id is appended.
    #[arg(long, default_value = "cdisk")]
    name: String,

    /// Cipher key as hex (16 bytes for AES-128). Prompted for when absent.
    #[arg(short, long, value_name = "HEX")]
    key: Option<String>,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    Builder::new()
        .format(|buf, record| {
            let style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "[{} {style}{}{style:#}] {}",
                buf.timestamp_seconds(),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .init();
}

fn read_key(cli: &Cli) -> anyhow::Result<Zeroizing<Vec<u8>>> {
    let hex_key = match &cli.key {
        Some(k) => Zeroizing::new(k.clone()),
        None => {
            print!("[-] Enter key (hex): ");
            io::stdout().flush()?;
            Zeroizing::new(rpassword::read_password()?)
        }
    };
    let key = hex::decode(hex_key.trim()).context("key is not valid hex")?;
    Ok(Zeroizing::new(key))
}

/// Writes marker patterns to the first and last sector and reads both back,
/// the userspace stand-in for the original module's load-time smoke path.
fn exercise(device: &Device) -> anyhow::Result<()> {
    let block = device.block_size();
    let last = device.capacity() / block as u64 - 1;

    for (sector, fill) in [(0u64, 0xAAu8), (last, 0x55)] {
        device.write(sector, vec![fill; block]).wait()?;
        let back = device
            .read(sector, 1)
            .wait()?
            .context("read completed without data")?;
        anyhow::ensure!(
            back == vec![fill; block],
            "sector {sector} mismatch after round trip"
        );
        info!("sector {sector}: round trip ok");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if std::env::var("RUST_LOG").is_err() {
        let v = if cli.verbose == 0 { 1 } else { cli.verbose };
        init_logger(v);
    } else {
        env_logger::init();
    }

    let key = read_key(&cli)?;
    let cipher = Box::new(AesChunkCipher::new(key.as_slice())?);

    let config = DeviceConfig {
        name: cli.name.clone(),
        capacity_sectors: cli.capacity_sectors,
        block_size: cli.block_size,
    };
    let device = Device::create(config, cipher)?;

    let geo = device.geometry();
    info!(
        "{}: {} bytes, geometry C/H/S = {}/{}/{}",
        device.name(),
        device.capacity(),
        geo.cylinders,
        geo.heads,
        geo.sectors_per_track
    );

    exercise(&device)?;
    device.destroy()?;
    info!("all contents discarded");
    Ok(())
}
