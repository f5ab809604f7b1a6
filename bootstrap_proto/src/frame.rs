// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::codec::{atohex, hex2str, hex_pair, hex_pairs, HEX_FIELD_LEN};
use crate::crc::Crc32c;
use crate::transport::Transport;
use crate::Error;
use log::trace;
use packed_struct::prelude::*;

/// Start of frame. Receivers discard everything up to and including this.
pub const SOF: u8 = b'>';
pub const SEPARATOR: u8 = b',';
/// Header length after the SOF, from the opcode through the payload delimiter.
pub const HEADER_LEN: usize = 20;

/// How the payload bytes travel on the wire.
///
/// The CRC covers the bytes as transmitted, so in hex mode it is computed
/// over the digit pairs and not over the decoded bytes. Replies use the mode
/// of the request they answer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum PayloadMode {
    /// Two ASCII hex digits per byte, delimiter `#`.
    #[default]
    Hex,
    /// Raw bytes, delimiter `%`.
    Binary,
}

impl PayloadMode {
    pub fn delimiter(self) -> u8 {
        match self {
            PayloadMode::Hex => b'#',
            PayloadMode::Binary => b'%',
        }
    }

    pub fn from_delimiter(d: u8) -> Option<PayloadMode> {
        match d {
            b'#' => Some(PayloadMode::Hex),
            b'%' => Some(PayloadMode::Binary),
            _ => None,
        }
    }
}

/// The fixed-size header exactly as it sits on the wire.
#[derive(Debug, PackedStruct)]
#[packed_struct(size_bytes = "20", bit_numbering = "msb0")]
pub struct RawHeader {
    #[packed_field(bytes = "0")]
    opcode: u8,
    #[packed_field(bytes = "1")]
    sep0: u8,
    #[packed_field(bytes = "2..=9")]
    arg0: [u8; 8],
    #[packed_field(bytes = "10")]
    sep1: u8,
    #[packed_field(bytes = "11..=18")]
    length: [u8; 8],
    #[packed_field(bytes = "19")]
    delimiter: u8,
}

/// A validated frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub opcode: u8,
    pub arg0: u32,
    /// Payload length in bytes, before any hex encoding.
    pub length: u32,
    pub mode: PayloadMode,
}

impl FrameHeader {
    /// Validates the structure of a raw header. Anything out of place makes
    /// the whole frame garbled.
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Result<FrameHeader, Error> {
        let raw = RawHeader::unpack(bytes).map_err(|_| Error::Garbled)?;

        if raw.sep0 != SEPARATOR || raw.sep1 != SEPARATOR {
            return Err(Error::Garbled);
        }

        Ok(FrameHeader {
            opcode: raw.opcode,
            arg0: atohex(&raw.arg0).ok_or(Error::Garbled)?,
            length: atohex(&raw.length).ok_or(Error::Garbled)?,
            mode: PayloadMode::from_delimiter(raw.delimiter).ok_or(Error::Garbled)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let raw = RawHeader {
            opcode: self.opcode,
            sep0: SEPARATOR,
            arg0: hex2str(self.arg0),
            sep1: SEPARATOR,
            length: hex2str(self.length),
            delimiter: self.mode.delimiter(),
        };

        // Every field is a plain byte or byte array
        raw.pack().unwrap()
    }
}

/// A complete, CRC-checked frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: u8, arg0: u32, payload: impl Into<Vec<u8>>, mode: PayloadMode) -> Frame {
        let payload = payload.into();
        Frame {
            header: FrameHeader {
                opcode,
                arg0,
                length: payload.len() as u32,
                mode,
            },
            payload,
        }
    }

    /// Serialises the frame, SOF through trailing CRC.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = self.header.to_bytes();
        let body = match self.header.mode {
            PayloadMode::Hex => hex_pairs(&self.payload),
            PayloadMode::Binary => self.payload.clone(),
        };

        let mut crc = Crc32c::new();
        crc.digest(&header);
        crc.digest(&body);

        let mut v = Vec::with_capacity(1 + HEADER_LEN + body.len() + HEX_FIELD_LEN);
        v.push(SOF);
        v.extend_from_slice(&header);
        v.extend_from_slice(&body);
        v.extend_from_slice(&hex2str(crc.get_crc()));
        v
    }
}

pub fn write_frame<T: Transport + ?Sized>(port: &mut T, frame: &Frame) -> Result<(), Error> {
    let bytes = frame.to_bytes();
    trace!("tx {}", String::from_utf8_lossy(&bytes));

    port.write_bytes(&bytes)?;
    port.flush()?;

    Ok(())
}

/// A header as received, along with the CRC of its wire bytes.
#[derive(Debug, Clone, Copy)]
pub struct ReceivedHeader {
    pub header: FrameHeader,
    crc: Crc32c,
}

/// Skips input up to the next SOF, then reads and validates a header.
pub fn read_header<T: Transport + ?Sized>(port: &mut T) -> Result<ReceivedHeader, Error> {
    let mut skipped = 0usize;
    while port.read_byte()? != SOF {
        skipped += 1;
    }
    if skipped > 0 {
        trace!("discarded {skipped} bytes before SOF");
    }

    let mut bytes = [0u8; HEADER_LEN];
    port.read_bytes(&mut bytes)?;
    trace!("rx header {}", String::from_utf8_lossy(&bytes));

    let header = FrameHeader::parse(&bytes)?;
    let mut crc = Crc32c::new();
    crc.digest(&bytes);

    Ok(ReceivedHeader { header, crc })
}

/// Reads the payload and CRC that follow a header.
///
/// The CRC is accumulated as bytes arrive. Non-hex characters in a hex
/// payload do not stop the read; the frame is consumed through its CRC first
/// so that a corrupted frame reports as a CRC failure.
pub fn read_body<T: Transport + ?Sized>(
    port: &mut T,
    rx: &ReceivedHeader,
) -> Result<Vec<u8>, Error> {
    let header = &rx.header;
    let mut crc = rx.crc;

    let len = header.length as usize;
    let mut payload = Vec::with_capacity(len);
    let mut bad_hex = false;

    match header.mode {
        PayloadMode::Hex => {
            for _ in 0..len {
                let mut pair = [0u8; 2];
                port.read_bytes(&mut pair)?;
                crc.digest(&pair);
                payload.push(hex_pair(pair[0], pair[1]).unwrap_or_else(|| {
                    bad_hex = true;
                    0
                }));
            }
        }
        PayloadMode::Binary => {
            payload.resize(len, 0);
            port.read_bytes(&mut payload)?;
            crc.digest(&payload);
        }
    }

    let mut field = [0u8; HEX_FIELD_LEN];
    port.read_bytes(&mut field)?;
    let got = crc.get_crc();

    match atohex(&field) {
        Some(expected) if expected == got => {}
        expected => {
            return Err(Error::CrcFailure {
                expected: expected.unwrap_or(!got),
                got,
            })
        }
    }

    if bad_hex {
        return Err(Error::BadHex);
    }

    Ok(payload)
}

/// Reads and discards the payload and CRC that follow a header, without
/// buffering them. Used when a frame is refused on its header alone.
pub fn skip_body<T: Transport + ?Sized>(port: &mut T, header: &FrameHeader) -> Result<(), Error> {
    let payload = match header.mode {
        PayloadMode::Hex => 2 * header.length as usize,
        PayloadMode::Binary => header.length as usize,
    };

    let mut scratch = [0u8; 64];
    let mut left = payload + HEX_FIELD_LEN;
    while left > 0 {
        let n = left.min(scratch.len());
        port.read_bytes(&mut scratch[..n])?;
        left -= n;
    }
    trace!("skipped {} bytes of refused frame", payload + HEX_FIELD_LEN);

    Ok(())
}

/// Reads one complete frame, refusing payloads longer than `max_payload`.
pub fn read_frame<T: Transport + ?Sized>(port: &mut T, max_payload: usize) -> Result<Frame, Error> {
    let rx = read_header(port)?;
    if rx.header.length as usize > max_payload {
        return Err(Error::PayloadTooLarge {
            len: rx.header.length,
            max: max_payload,
        });
    }

    let payload = read_body(port, &rx)?;
    Ok(Frame {
        header: rx.header,
        payload,
    })
}
