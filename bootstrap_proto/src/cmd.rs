// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use byteorder::{BigEndian, ByteOrder};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use sha2::{Digest, Sha256};
use strum_macros::EnumIter;

/// Size of the SJTAG challenge and of the response to it.
pub const SJTAG_LEN: usize = 32;

/// Command characters. The exact values are what the device and the host
/// tooling agree on.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive, EnumIter)]
pub enum Opcode {
    Version = b'V',
    Send = b'S',
    Data = b'D',
    Authenticate = b'U',
    Strap = b'O',
    TraceLevel = b'T',
    OtpProgram = b'P',
    OtpRandom = b'R',
    OtpCommitEmulation = b'M',
    OtpRegions = b'G',
    OtpReadEmulated = b'L',
    OtpReadRaw = b'l',
    Continue = b'C',
    SjtagChallenge = b'Q',
    SjtagResponse = b'J',
    WriteFip = b'W',
    WriteRaw = b'I',
    Bind = b'B',
    Reset = b'e',
    Ack = b'A',
    Nack = b'N',
}

impl Opcode {
    pub fn from_byte(b: u8) -> Option<Opcode> {
        Opcode::from_u8(b)
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Why a request could not be turned into a [`Command`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommandError {
    /// Not a request opcode.
    Unknown(u8),
    /// The payload does not have the shape this command needs.
    InvalidArgument,
}

/// One area of OTP to program, as carried by [`Command::OtpRegions`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OtpRegion<'a> {
    pub offset: u32,
    pub data: &'a [u8],
}

/// A decoded request with its typed arguments.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Version,
    /// Start a download. `total` is the announced image size, 0 if unknown;
    /// `chunk` (possibly empty) lands at offset 0.
    Send { total: u32, chunk: &'a [u8] },
    Data { offset: u32, chunk: &'a [u8] },
    Authenticate,
    Strap(u32),
    TraceLevel(u32),
    OtpProgram { offset: u32, data: &'a [u8] },
    OtpRandom { offset: u32, len: u32 },
    OtpCommitEmulation,
    /// Raw region list, see [`regions`].
    OtpRegions(&'a [u8]),
    OtpRead { offset: u32, len: u32, emulated: bool },
    Continue,
    SjtagChallenge,
    SjtagResponse(&'a [u8; SJTAG_LEN]),
    WriteFip,
    WriteRaw { offset: u32 },
    Bind,
    Reset,
}

fn payload_u32(payload: &[u8]) -> Result<u32, CommandError> {
    if payload.len() != 4 {
        return Err(CommandError::InvalidArgument);
    }
    Ok(BigEndian::read_u32(payload))
}

fn no_payload(payload: &[u8]) -> Result<(), CommandError> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(CommandError::InvalidArgument)
    }
}

impl<'a> Command<'a> {
    pub fn decode(opcode: u8, arg0: u32, payload: &'a [u8]) -> Result<Command<'a>, CommandError> {
        let op = Opcode::from_byte(opcode).ok_or(CommandError::Unknown(opcode))?;

        let cmd = match op {
            Opcode::Version => {
                no_payload(payload)?;
                Command::Version
            }
            Opcode::Send => Command::Send {
                total: arg0,
                chunk: payload,
            },
            Opcode::Data => Command::Data {
                offset: arg0,
                chunk: payload,
            },
            Opcode::Authenticate => {
                no_payload(payload)?;
                Command::Authenticate
            }
            Opcode::Strap => Command::Strap(arg0),
            Opcode::TraceLevel => Command::TraceLevel(arg0),
            Opcode::OtpProgram => {
                if payload.is_empty() {
                    return Err(CommandError::InvalidArgument);
                }
                Command::OtpProgram {
                    offset: arg0,
                    data: payload,
                }
            }
            Opcode::OtpRandom => Command::OtpRandom {
                offset: arg0,
                len: payload_u32(payload)?,
            },
            Opcode::OtpCommitEmulation => Command::OtpCommitEmulation,
            Opcode::OtpRegions => {
                // Reject malformed lists before anything gets programmed
                for r in regions(payload) {
                    r?;
                }
                Command::OtpRegions(payload)
            }
            Opcode::OtpReadEmulated | Opcode::OtpReadRaw => Command::OtpRead {
                offset: arg0,
                len: payload_u32(payload)?,
                emulated: op == Opcode::OtpReadEmulated,
            },
            Opcode::Continue => Command::Continue,
            Opcode::SjtagChallenge => Command::SjtagChallenge,
            Opcode::SjtagResponse => {
                Command::SjtagResponse(payload.try_into().map_err(|_| CommandError::InvalidArgument)?)
            }
            Opcode::WriteFip => Command::WriteFip,
            Opcode::WriteRaw => Command::WriteRaw { offset: arg0 },
            Opcode::Bind => Command::Bind,
            Opcode::Reset => Command::Reset,
            Opcode::Ack | Opcode::Nack => return Err(CommandError::Unknown(opcode)),
        };

        Ok(cmd)
    }

    /// The opcode, `arg0` and payload that carry this command.
    pub fn encode(&self) -> (Opcode, u32, Vec<u8>) {
        match *self {
            Command::Version => (Opcode::Version, 0, Vec::new()),
            Command::Send { total, chunk } => (Opcode::Send, total, chunk.to_vec()),
            Command::Data { offset, chunk } => (Opcode::Data, offset, chunk.to_vec()),
            Command::Authenticate => (Opcode::Authenticate, 0, Vec::new()),
            Command::Strap(v) => (Opcode::Strap, v, Vec::new()),
            Command::TraceLevel(v) => (Opcode::TraceLevel, v, Vec::new()),
            Command::OtpProgram { offset, data } => (Opcode::OtpProgram, offset, data.to_vec()),
            Command::OtpRandom { offset, len } => {
                (Opcode::OtpRandom, offset, len.to_be_bytes().to_vec())
            }
            Command::OtpCommitEmulation => (Opcode::OtpCommitEmulation, 0, Vec::new()),
            Command::OtpRegions(list) => (Opcode::OtpRegions, 0, list.to_vec()),
            Command::OtpRead {
                offset,
                len,
                emulated,
            } => {
                let op = if emulated {
                    Opcode::OtpReadEmulated
                } else {
                    Opcode::OtpReadRaw
                };
                (op, offset, len.to_be_bytes().to_vec())
            }
            Command::Continue => (Opcode::Continue, 0, Vec::new()),
            Command::SjtagChallenge => (Opcode::SjtagChallenge, 0, Vec::new()),
            Command::SjtagResponse(r) => (Opcode::SjtagResponse, 0, r.to_vec()),
            Command::WriteFip => (Opcode::WriteFip, 0, Vec::new()),
            Command::WriteRaw { offset } => (Opcode::WriteRaw, offset, Vec::new()),
            Command::Bind => (Opcode::Bind, 0, Vec::new()),
            Command::Reset => (Opcode::Reset, 0, Vec::new()),
        }
    }
}

/// Iterates over an OTP region list: repeated big-endian `offset`, `length`
/// words each followed by `length` data bytes.
pub fn regions(list: &[u8]) -> impl Iterator<Item = Result<OtpRegion<'_>, CommandError>> {
    let mut rest = list;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        if rest.len() < 8 {
            rest = &[];
            return Some(Err(CommandError::InvalidArgument));
        }
        let offset = BigEndian::read_u32(&rest[0..4]);
        let len = BigEndian::read_u32(&rest[4..8]) as usize;
        let body = &rest[8..];
        if len == 0 || body.len() < len {
            rest = &[];
            return Some(Err(CommandError::InvalidArgument));
        }
        rest = &body[len..];
        Some(Ok(OtpRegion {
            offset,
            data: &body[..len],
        }))
    })
}

/// Builds an OTP region list.
pub fn encode_regions(list: &[OtpRegion<'_>]) -> Vec<u8> {
    let mut v = Vec::new();
    for r in list {
        v.extend_from_slice(&r.offset.to_be_bytes());
        v.extend_from_slice(&(r.data.len() as u32).to_be_bytes());
        v.extend_from_slice(r.data);
    }
    v
}

/// The answer to an SJTAG challenge: SHA-256 over the challenge followed by
/// the shared key.
pub fn sjtag_response(challenge: &[u8; SJTAG_LEN], key: &[u8; SJTAG_LEN]) -> [u8; SJTAG_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(challenge);
    hasher.update(key);
    hasher.finalize().into()
}
