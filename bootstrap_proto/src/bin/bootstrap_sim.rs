// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runs the bootstrap monitor against a simulated board on a serial port
//! (or one end of a pty pair), so host tooling can be exercised without a
//! device.

use anyhow::{Context, Result};
use bootstrap_proto::cmd::SJTAG_LEN;
use bootstrap_proto::monitor::{Exit, Monitor, MonitorConfig};
use bootstrap_proto::sim::SimBoard;
use bootstrap_proto::Error;
use clap::Parser;
use log::info;
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[clap(name = "bootstrap-sim")]
struct Sim {
    /// UART port
    #[clap(name = "port")]
    port: String,
    #[clap(short = 'b', default_value = "115200")]
    baud_rate: u32,
    /// Initial OTP contents
    #[clap(long)]
    otp: Option<PathBuf>,
    /// Where to save the OTP contents when the simulator exits
    #[clap(long)]
    save_otp: Option<PathBuf>,
    /// 32-byte key for SJTAG challenges
    #[clap(long)]
    sjtag_key: Option<PathBuf>,
    /// Version string to report
    #[clap(long)]
    version: Option<String>,
    #[clap(long, default_value_t = MonitorConfig::default().max_payload)]
    max_payload: usize,
    #[clap(long, default_value_t = MonitorConfig::default().image_capacity)]
    image_capacity: usize,
    /// Go back to the monitor when the host says continue
    #[clap(long)]
    stay: bool,
    #[clap(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cmd = Sim::parse();
    bootstrap_proto::init_logger(cmd.verbose);

    let mut board = SimBoard::new();
    if let Some(path) = &cmd.otp {
        let image = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        board = board.with_otp(&image);
    }
    if let Some(path) = &cmd.sjtag_key {
        let bytes = std::fs::read(path)?;
        let key: [u8; SJTAG_LEN] = bytes[..]
            .try_into()
            .with_context(|| format!("SJTAG key must be {SJTAG_LEN} bytes"))?;
        board = board.with_sjtag_key(key);
    }
    if let Some(version) = cmd.version {
        board.version = version;
    }

    let config = MonitorConfig {
        max_payload: cmd.max_payload,
        image_capacity: cmd.image_capacity,
    };

    let mut port = serialport::new(&cmd.port, cmd.baud_rate)
        .timeout(Duration::from_secs(1))
        .data_bits(DataBits::Eight)
        .flow_control(FlowControl::None)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .open()
        .with_context(|| format!("opening {}", cmd.port))?;
    let port = &mut *port;

    info!("simulating {} on {}", board.version, cmd.port);

    loop {
        let exit = {
            let mut monitor = Monitor::new(&mut board, config.clone());
            loop {
                match monitor.serve_one(port) {
                    Ok(Some(exit)) => break exit,
                    Ok(None) => {}
                    // Idle line; keep waiting
                    Err(Error::Comms(e)) if e.kind() == ErrorKind::TimedOut => {}
                    Err(e) => return Err(e).context("monitor failed"),
                }
            }
        };

        match exit {
            Exit::Reset => info!("simulated reset, {} so far", board.resets),
            Exit::Continue if cmd.stay => info!("continue requested, staying in monitor"),
            Exit::Continue => break,
        }
    }

    if let Some(path) = &cmd.save_otp {
        std::fs::write(path, &board.otp).with_context(|| format!("writing {}", path.display()))?;
        info!("OTP saved to {}", path.display());
    }

    Ok(())
}
