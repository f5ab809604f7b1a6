// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{bail, Context, Result};
use bootstrap_proto::client::*;
use bootstrap_proto::cmd::SJTAG_LEN;
use bootstrap_proto::frame::PayloadMode;
use clap::Parser;
use otp_tags::provision::Manifest;
use otp_tags::{TagStore, TagType, TAG_END, TAG_START};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

/// How an image travels to the device.
#[derive(Debug, clap::Args)]
struct Transfer {
    /// Bytes per data frame; must not exceed the device's frame limit
    #[clap(long, default_value_t = DEFAULT_CHUNK)]
    chunk: usize,
    /// Send payloads as raw bytes instead of hex digit pairs
    #[clap(long)]
    binary: bool,
}

impl Transfer {
    fn mode(&self) -> PayloadMode {
        if self.binary {
            PayloadMode::Binary
        } else {
            PayloadMode::Hex
        }
    }
}

#[derive(Debug, Parser)]
enum BootstrapCommand {
    /// Asks the device for its firmware version
    Version,
    /// Downloads an image into the device's RAM buffer
    Download {
        file: PathBuf,
        #[clap(flatten)]
        transfer: Transfer,
    },
    /// Downloads an image, authenticates it and boots it
    Boot {
        file: PathBuf,
        #[clap(flatten)]
        transfer: Transfer,
    },
    /// Authenticates the image already downloaded
    Authenticate,
    /// Overrides the boot strapping
    Strap {
        #[arg(value_parser = parse_int::parse::<u32>)]
        value: u32,
    },
    /// Sets the firmware trace level (0, 10, 20, 30, 40 or 50)
    TraceLevel {
        #[arg(value_parser = parse_int::parse::<u32>)]
        level: u32,
    },
    /// Programs the contents of a file into OTP. Bits can only be set!
    OtpProgram {
        #[arg(value_parser = parse_int::parse::<u32>)]
        offset: u32,
        file: PathBuf,
    },
    /// Programs device-generated random bytes into OTP
    OtpRandom {
        #[arg(value_parser = parse_int::parse::<u32>)]
        offset: u32,
        #[arg(value_parser = parse_int::parse::<u32>)]
        len: u32,
    },
    /// Burns everything programmed through the OTP emulation for real
    OtpCommit,
    /// Reads OTP, through the emulation unless `--raw` is given
    OtpRead {
        #[arg(value_parser = parse_int::parse::<u32>)]
        offset: u32,
        #[arg(value_parser = parse_int::parse::<u32>)]
        len: u32,
        #[clap(long)]
        raw: bool,
        /// Write to FILE, or dump hex to stdout if omitted
        file: Option<PathBuf>,
    },
    /// Lists the tags in the OTP tag region
    OtpTags {
        #[clap(long)]
        raw: bool,
    },
    /// Programs the tags described by a TOML manifest
    Provision {
        manifest: PathBuf,
        /// Commit the emulation afterwards. This is irreversible!
        #[clap(long)]
        commit: bool,
    },
    /// Unlocks secure JTAG with a 32-byte key file
    SjtagUnlock { key: PathBuf },
    /// Downloads a FIP image and writes it to the boot media
    WriteFip {
        file: PathBuf,
        #[clap(flatten)]
        transfer: Transfer,
    },
    /// Downloads an image and writes it verbatim at a media offset
    WriteRaw {
        #[arg(value_parser = parse_int::parse::<u32>)]
        offset: u32,
        file: PathBuf,
        #[clap(flatten)]
        transfer: Transfer,
    },
    /// Downloads a FIP image, binds it to this device and writes it
    Bind {
        file: PathBuf,
        #[clap(flatten)]
        transfer: Transfer,
    },
    /// Leaves the monitor and continues booting
    Continue,
    /// Resets the device
    Reset,
}

#[derive(Debug, Parser)]
#[clap(name = "bootstrap")]
struct Bootstrap {
    /// UART port
    #[clap(name = "port")]
    port: String,
    /// How fast to run the UART
    #[clap(short = 'b', default_value = "115200")]
    baud_rate: u32,
    /// Log every frame
    #[clap(short, long)]
    verbose: bool,
    #[clap(subcommand)]
    cmd: BootstrapCommand,
}

fn open_port(name: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>> {
    // Start with a short timeout so stale input can be drained portably
    let mut port = serialport::new(name, baud_rate)
        .timeout(Duration::from_millis(100))
        .data_bits(DataBits::Eight)
        .flow_control(FlowControl::None)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .open()
        .with_context(|| format!("opening {name}"))?;

    loop {
        let mut throwaway = [0; 16];
        match port.read(&mut throwaway) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::TimedOut => break,
            Err(e) => return Err(e.into()),
        }
    }

    // OTP programming can take a while per request
    port.set_timeout(Duration::from_secs(5))?;

    Ok(port)
}

fn download(port: &mut dyn SerialPort, file: &PathBuf, transfer: &Transfer) -> Result<()> {
    let image = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    println!("Downloading {} bytes, this may take a while", image.len());
    do_download(port, &image, transfer.chunk, transfer.mode()).context("download failed")?;
    Ok(())
}

fn printable(value: &[u8]) -> bool {
    !value.is_empty() && value.iter().all(|b| b.is_ascii_graphic() || *b == b' ')
}

fn main() -> Result<()> {
    let cmd = Bootstrap::parse();
    bootstrap_proto::init_logger(cmd.verbose);

    let mut port = open_port(&cmd.port, cmd.baud_rate)?;
    let port = &mut *port;

    match cmd.cmd {
        BootstrapCommand::Version => {
            println!("{}", do_version(port)?);
        }
        BootstrapCommand::Download { file, transfer } => {
            download(port, &file, &transfer)?;
            println!("Download complete!");
        }
        BootstrapCommand::Boot { file, transfer } => {
            download(port, &file, &transfer)?;
            do_authenticate(port).context("image rejected")?;
            do_continue(port)?;
            println!("Image authenticated, device is booting");
        }
        BootstrapCommand::Authenticate => {
            do_authenticate(port)?;
            println!("Image authenticated");
        }
        BootstrapCommand::Strap { value } => {
            do_strap(port, value)?;
            println!("Strapping set to {value:#x}");
        }
        BootstrapCommand::TraceLevel { level } => {
            do_trace_level(port, level)?;
        }
        BootstrapCommand::OtpProgram { offset, file } => {
            let data = std::fs::read(&file)?;
            if data.is_empty() {
                bail!("{} is empty", file.display());
            }
            for (i, piece) in data.chunks(DEFAULT_CHUNK).enumerate() {
                let at = offset + (i * DEFAULT_CHUNK) as u32;
                do_otp_program(port, at, piece)
                    .with_context(|| format!("programming OTP at {at:#x}"))?;
            }
            println!("Programmed {} bytes at {offset:#x}", data.len());
        }
        BootstrapCommand::OtpRandom { offset, len } => {
            do_otp_random(port, offset, len)?;
            println!("Programmed {len} random bytes at {offset:#x}");
        }
        BootstrapCommand::OtpCommit => {
            do_otp_commit(port)?;
            println!("OTP emulation committed");
        }
        BootstrapCommand::OtpRead {
            offset,
            len,
            raw,
            file,
        } => {
            let data = do_otp_read(port, offset, len, !raw)?;
            match file {
                Some(path) => {
                    let mut out = std::fs::OpenOptions::new()
                        .write(true)
                        .truncate(true)
                        .create(true)
                        .open(&path)?;
                    out.write_all(&data)?;
                    println!("Output written to {path:?}");
                }
                None => {
                    for (i, line) in data.chunks(16).enumerate() {
                        println!("{:04x}: {}", offset as usize + i * 16, hex::encode(line));
                    }
                }
            }
        }
        BootstrapCommand::OtpTags { raw } => {
            let mut region = Vec::with_capacity(TAG_END - TAG_START);
            for at in (TAG_START..TAG_END).step_by(DEFAULT_CHUNK) {
                let len = DEFAULT_CHUNK.min(TAG_END - at) as u32;
                let piece = do_otp_read(port, at as u32, len, !raw)
                    .with_context(|| format!("reading OTP at {at:#x}"))?;
                region.extend_from_slice(&piece);
            }

            let store = TagStore::with_region(&region[..], 0, region.len());
            let mut found = 0;
            for entry in store.iter() {
                let entry = entry.context("walking tag region")?;
                let name = match TagType::from_id(entry.tag_id) {
                    Some(t) => t.to_string(),
                    None => format!("{:#05x}", entry.tag_id),
                };
                let value = if printable(&entry.value) {
                    format!("{:?}", String::from_utf8_lossy(&entry.value))
                } else {
                    hex::encode(&entry.value)
                };
                println!("{:#06x} {name:<14} {value}", TAG_START + entry.offset);
                found += 1;
            }
            println!("{found} tags");
        }
        BootstrapCommand::Provision { manifest, commit } => {
            let text = std::fs::read_to_string(&manifest)
                .with_context(|| format!("reading {}", manifest.display()))?;
            let manifest = Manifest::from_toml(&text)?;
            let blob = manifest.render()?;
            if blob.is_empty() {
                bail!("manifest has no tags");
            }

            for (i, piece) in blob.chunks(DEFAULT_CHUNK).enumerate() {
                let at = (manifest.base + i * DEFAULT_CHUNK) as u32;
                do_otp_program(port, at, piece)
                    .with_context(|| format!("programming OTP at {at:#x}"))?;
            }
            println!(
                "Programmed {} tags ({} bytes) at {:#x}",
                manifest.tags.len(),
                blob.len(),
                manifest.base
            );

            if commit {
                do_otp_commit(port)?;
                println!("OTP emulation committed");
            }
        }
        BootstrapCommand::SjtagUnlock { key } => {
            let bytes = std::fs::read(&key)?;
            let key: [u8; SJTAG_LEN] = bytes[..]
                .try_into()
                .with_context(|| format!("SJTAG key must be {SJTAG_LEN} bytes"))?;
            do_sjtag_unlock(port, &key)?;
            println!("SJTAG unlocked");
        }
        BootstrapCommand::WriteFip { file, transfer } => {
            download(port, &file, &transfer)?;
            do_write_fip(port)?;
            println!("FIP written");
        }
        BootstrapCommand::WriteRaw {
            offset,
            file,
            transfer,
        } => {
            download(port, &file, &transfer)?;
            do_write_raw(port, offset)?;
            println!("Image written at {offset:#x}");
        }
        BootstrapCommand::Bind { file, transfer } => {
            download(port, &file, &transfer)?;
            do_bind(port)?;
            println!("FIP bound and written");
        }
        BootstrapCommand::Continue => {
            do_continue(port)?;
        }
        BootstrapCommand::Reset => {
            do_reset(port)?;
            println!("Device reset");
        }
    }

    Ok(())
}
