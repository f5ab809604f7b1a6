// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host side: one function per device operation, each sending a request and
//! waiting for its reply.

use crate::cmd::{encode_regions, sjtag_response, Command, Opcode, OtpRegion, SJTAG_LEN};
use crate::frame::{self, Frame, PayloadMode};
use crate::monitor::NackReason;
use crate::transport::Transport;
use crate::Error;
use log::{debug, info};
use std::str::FromStr;

/// Largest reply payload the host will accept.
pub const MAX_REPLY: usize = 64 * 1024;

/// Chunk size for downloads when the caller has no better idea.
pub const DEFAULT_CHUNK: usize = 512;

pub fn send_request<T: Transport + ?Sized>(
    port: &mut T,
    cmd: Command<'_>,
    mode: PayloadMode,
) -> Result<(), Error> {
    let (op, arg0, payload) = cmd.encode();
    debug!("sending {op:?} arg0={arg0:#x} len={}", payload.len());
    frame::write_frame(port, &Frame::new(op.as_byte(), arg0, payload, mode))
}

/// Waits for the answer to a request. An ACK yields its payload; a NACK
/// becomes an error carrying the device's reason.
pub fn read_reply<T: Transport + ?Sized>(port: &mut T) -> Result<Vec<u8>, Error> {
    let reply = frame::read_frame(port, MAX_REPLY)?;

    match Opcode::from_byte(reply.header.opcode) {
        Some(Opcode::Ack) => Ok(reply.payload),
        Some(Opcode::Nack) => {
            let text = String::from_utf8_lossy(&reply.payload);
            Err(match NackReason::from_str(&text) {
                Ok(reason) => Error::Nack(reason),
                Err(_) => Error::NackOther(text.into_owned()),
            })
        }
        _ => Err(Error::UnexpectedReply(reply.header.opcode)),
    }
}

pub fn transact<T: Transport + ?Sized>(
    port: &mut T,
    cmd: Command<'_>,
    mode: PayloadMode,
) -> Result<Vec<u8>, Error> {
    send_request(port, cmd, mode)?;
    read_reply(port)
}

fn expect_empty(reply: Vec<u8>) -> Result<(), Error> {
    if !reply.is_empty() {
        return Err(Error::ReplyLength {
            expected: 0,
            got: reply.len(),
        });
    }
    Ok(())
}

fn simple<T: Transport + ?Sized>(port: &mut T, cmd: Command<'_>) -> Result<(), Error> {
    expect_empty(transact(port, cmd, PayloadMode::Hex)?)
}

pub fn do_version<T: Transport + ?Sized>(port: &mut T) -> Result<String, Error> {
    let reply = transact(port, Command::Version, PayloadMode::Hex)?;
    Ok(String::from_utf8_lossy(&reply).into_owned())
}

/// Downloads `image` in chunks of at most `chunk` bytes, announcing its
/// total size up front.
pub fn do_download<T: Transport + ?Sized>(
    port: &mut T,
    image: &[u8],
    chunk: usize,
    mode: PayloadMode,
) -> Result<(), Error> {
    let chunk = chunk.max(1);
    let total = u32::try_from(image.len()).map_err(|_| Error::PayloadTooLarge {
        len: u32::MAX,
        max: u32::MAX as usize,
    })?;

    let mut pieces = image.chunks(chunk);
    let first = pieces.next().unwrap_or(&[]);
    expect_empty(transact(
        port,
        Command::Send {
            total,
            chunk: first,
        },
        mode,
    )?)?;

    let mut offset = first.len();
    for piece in pieces {
        expect_empty(transact(
            port,
            Command::Data {
                offset: offset as u32,
                chunk: piece,
            },
            mode,
        )?)?;
        offset += piece.len();
        debug!("sent {offset} of {total} bytes");
    }

    info!("downloaded {total} bytes");
    Ok(())
}

pub fn do_authenticate<T: Transport + ?Sized>(port: &mut T) -> Result<(), Error> {
    simple(port, Command::Authenticate)
}

pub fn do_strap<T: Transport + ?Sized>(port: &mut T, value: u32) -> Result<(), Error> {
    simple(port, Command::Strap(value))
}

pub fn do_trace_level<T: Transport + ?Sized>(port: &mut T, level: u32) -> Result<(), Error> {
    simple(port, Command::TraceLevel(level))
}

pub fn do_otp_program<T: Transport + ?Sized>(
    port: &mut T,
    offset: u32,
    data: &[u8],
) -> Result<(), Error> {
    simple(port, Command::OtpProgram { offset, data })
}

pub fn do_otp_random<T: Transport + ?Sized>(port: &mut T, offset: u32, len: u32) -> Result<(), Error> {
    simple(port, Command::OtpRandom { offset, len })
}

pub fn do_otp_commit<T: Transport + ?Sized>(port: &mut T) -> Result<(), Error> {
    simple(port, Command::OtpCommitEmulation)
}

/// Programs several OTP areas in one request.
pub fn do_otp_regions<T: Transport + ?Sized>(
    port: &mut T,
    regions: &[OtpRegion<'_>],
) -> Result<(), Error> {
    let list = encode_regions(regions);
    simple(port, Command::OtpRegions(&list))
}

pub fn do_otp_read<T: Transport + ?Sized>(
    port: &mut T,
    offset: u32,
    len: u32,
    emulated: bool,
) -> Result<Vec<u8>, Error> {
    let reply = transact(
        port,
        Command::OtpRead {
            offset,
            len,
            emulated,
        },
        PayloadMode::Hex,
    )?;
    if reply.len() != len as usize {
        return Err(Error::ReplyLength {
            expected: len as usize,
            got: reply.len(),
        });
    }
    Ok(reply)
}

/// Runs the SJTAG challenge/response exchange with a shared key.
pub fn do_sjtag_unlock<T: Transport + ?Sized>(
    port: &mut T,
    key: &[u8; SJTAG_LEN],
) -> Result<(), Error> {
    let reply = transact(port, Command::SjtagChallenge, PayloadMode::Hex)?;
    let challenge: [u8; SJTAG_LEN] = reply[..].try_into().map_err(|_| Error::ReplyLength {
        expected: SJTAG_LEN,
        got: reply.len(),
    })?;

    let response = sjtag_response(&challenge, key);
    simple(port, Command::SjtagResponse(&response))
}

pub fn do_write_fip<T: Transport + ?Sized>(port: &mut T) -> Result<(), Error> {
    simple(port, Command::WriteFip)
}

pub fn do_write_raw<T: Transport + ?Sized>(port: &mut T, offset: u32) -> Result<(), Error> {
    simple(port, Command::WriteRaw { offset })
}

pub fn do_bind<T: Transport + ?Sized>(port: &mut T) -> Result<(), Error> {
    simple(port, Command::Bind)
}

pub fn do_continue<T: Transport + ?Sized>(port: &mut T) -> Result<(), Error> {
    simple(port, Command::Continue)
}

pub fn do_reset<T: Transport + ?Sized>(port: &mut T) -> Result<(), Error> {
    simple(port, Command::Reset)
}
