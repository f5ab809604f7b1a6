// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The serial bootstrap protocol used to push firmware and provisioning data
//! into a device during manufacturing or recovery.
//!
//! Every exchange is a request frame from the host answered by exactly one
//! ACK or NACK frame from the device:
//!
//! ```text
//! '>' cmd ',' arg0(8 hex) ',' len(8 hex) ('#' | '%') payload crc(8 hex)
//! ```
//!
//! The device side lives in [`monitor`], the host side in [`client`]; both
//! share the framing in [`frame`].

pub mod board;
pub mod client;
pub mod cmd;
pub mod codec;
pub mod crc;
pub mod frame;
pub mod monitor;
pub mod sim;
pub mod transport;

use monitor::NackReason;
use std::io::Write;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The fixed part of a frame did not have the expected layout.
    #[error("garbled frame header")]
    Garbled,

    /// A payload contained something other than hex digit pairs.
    #[error("payload is not valid hex")]
    BadHex,

    /// The frame announced a payload longer than the receiver accepts.
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: u32, max: usize },

    /// The trailing CRC did not match the received bytes.
    #[error("incorrect CRC on frame; expected {expected:#010x}, got {got:#010x}")]
    CrcFailure { expected: u32, got: u32 },

    /// The device answered with a NACK carrying a reason we know.
    #[error("device NACKed: {0}")]
    Nack(NackReason),

    /// The device answered with a NACK carrying a reason we don't know.
    #[error("device NACKed: {0}")]
    NackOther(String),

    /// A reply frame that is neither ACK nor NACK.
    #[error("expected ACK or NACK, got {0:#04x}")]
    UnexpectedReply(u8),

    /// The reply payload did not have the size the command implies.
    #[error("expected {expected} bytes in reply, got {got}")]
    ReplyLength { expected: usize, got: usize },

    /// Reading or writing the transport failed.
    #[error("communications error")]
    Comms(#[from] std::io::Error),
}

/// Sets up `env_logger` for the command line tools. Each line carries the
/// level and the module it came from, so wire traffic (`frame`) is easy to
/// tell apart from monitor and client chatter. `RUST_LOG` directives still
/// apply on top of the default filter.
pub fn init_logger(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    builder
        .format(|buf, record| {
            let mut level_style = buf.style();
            level_style.set_color(match record.level() {
                log::Level::Error => env_logger::fmt::Color::Red,
                log::Level::Warn => env_logger::fmt::Color::Yellow,
                log::Level::Info => env_logger::fmt::Color::Cyan,
                log::Level::Debug | log::Level::Trace => env_logger::fmt::Color::White,
            });

            let target = record.target();
            let source = target.rsplit("::").next().unwrap_or(target);

            writeln!(
                buf,
                "{} {source:>8}: {}",
                level_style.value(record.level().as_str().to_ascii_lowercase()),
                record.args()
            )
        })
        .filter(
            None,
            if verbose {
                log::LevelFilter::Trace
            } else {
                log::LevelFilter::Info
            },
        )
        .init();
}
