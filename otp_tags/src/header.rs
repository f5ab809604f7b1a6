// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{TagError, MAX_TAG_ID, RECORD_DATA, RECORD_SIZE};
use packed_struct::prelude::*;

/// Trailing two bytes of every tag record (record bytes 6 and 7).
///
/// ```text
///   byte 6          byte 7
/// | type[7:0]     | size[2:0] | cont | rsvd[2:0] | type[8] |
/// ```
///
/// `size` is the number of data bytes (record bytes 0..size) carried by this
/// record. 0 and 7 never occur in a programmed record: 0 is what blank OTP
/// reads as and 7 would overrun the six data bytes.
#[derive(Debug, Clone, Copy, PackedStruct)]
#[packed_struct(size_bytes = "2", bit_numbering = "msb0")]
struct RawTagTrailer {
    #[packed_field(bits = "0..=7")]
    type_low: u8,
    #[packed_field(bits = "8..=10")]
    size: Integer<u8, packed_bits::Bits<3>>,
    #[packed_field(bits = "11")]
    continuation: bool,
    #[packed_field(bits = "15")]
    type_high: bool,
}

/// Decoded form of a tag record trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    /// Data bytes in this record, 1..=6.
    pub size: u8,
    /// Another record belonging to the same value follows at the next offset.
    pub continuation: bool,
    /// Logical tag type, 9 bits.
    pub tag_id: u16,
}

impl TagHeader {
    /// Decodes the trailer of `record`. Returns `None` for records that do
    /// not carry a valid size, which includes blank (all zero) OTP.
    pub fn decode(record: &[u8; RECORD_SIZE]) -> Option<TagHeader> {
        let raw = RawTagTrailer::unpack(&[record[6], record[7]]).ok()?;
        let size = *raw.size;
        if size == 0 || usize::from(size) > RECORD_DATA {
            return None;
        }

        Some(TagHeader {
            size,
            continuation: raw.continuation,
            tag_id: (u16::from(raw.type_high) << 8) | u16::from(raw.type_low),
        })
    }

    /// Packs this header into the two trailer bytes of a record.
    pub fn encode(&self) -> Result<[u8; 2], TagError> {
        if self.size == 0 || usize::from(self.size) > RECORD_DATA {
            return Err(TagError::InvalidSize(self.size));
        }
        if self.tag_id > MAX_TAG_ID {
            return Err(TagError::InvalidTagId(self.tag_id));
        }

        let raw = RawTagTrailer {
            type_low: (self.tag_id & 0xff) as u8,
            size: self.size.into(),
            continuation: self.continuation,
            type_high: self.tag_id & 0x100 != 0,
        };

        raw.pack().map_err(|_| TagError::InvalidSize(self.size))
    }

    pub fn size_in_bytes(&self) -> usize {
        usize::from(self.size)
    }
}

/// One 8-byte record as read from OTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagRecord {
    pub raw: [u8; RECORD_SIZE],
}

impl TagRecord {
    pub fn new(raw: [u8; RECORD_SIZE]) -> TagRecord {
        TagRecord { raw }
    }

    pub fn header(&self) -> Option<TagHeader> {
        TagHeader::decode(&self.raw)
    }

    /// The data bytes carried by this record, or `None` if it is invalid.
    pub fn data(&self) -> Option<&[u8]> {
        let header = self.header()?;
        Some(&self.raw[..header.size_in_bytes()])
    }

    /// Builds a record from a header and up to six data bytes.
    pub fn build(header: TagHeader, data: &[u8]) -> Result<TagRecord, TagError> {
        if data.len() != header.size_in_bytes() {
            return Err(TagError::InvalidSize(data.len() as u8));
        }

        let mut raw = [0u8; RECORD_SIZE];
        raw[..data.len()].copy_from_slice(data);
        raw[RECORD_DATA..].copy_from_slice(&header.encode()?);

        Ok(TagRecord { raw })
    }
}
