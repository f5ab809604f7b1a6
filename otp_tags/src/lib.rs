// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tag-encoded provisioning records in one-time-programmable memory.
//!
//! The upper half of the 8 KiB OTP holds a dense sequence of 8-byte records.
//! Each record carries up to six data bytes plus a two byte trailer naming
//! the tag type, the number of valid data bytes and whether the value
//! continues in the next record. See [`header`] for the bit layout.

pub mod encode;
pub mod header;
pub mod provision;
pub mod store;

pub use encode::encode;
pub use header::{TagHeader, TagRecord};
pub use store::{OtpSource, TagEntry, TagStore};

use strum_macros::{Display, EnumIter, EnumString};

/// Total size of the (logical) OTP.
pub const OTP_SIZE: usize = 8192;
/// First byte of the tag region.
pub const TAG_START: usize = 4096;
/// One past the last byte of the tag region.
pub const TAG_END: usize = OTP_SIZE;
pub const RECORD_SIZE: usize = 8;
/// Data bytes available in one record.
pub const RECORD_DATA: usize = 6;
/// Tag ids are nine bits wide.
pub const MAX_TAG_ID: u16 = 0x1ff;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagError {
    /// The tag is not present. Callers generally treat this as benign.
    #[error("tag not found")]
    NotFound,

    /// A record could not be read, or a continuation record is invalid.
    #[error("unreadable or invalid OTP tag record")]
    Io,

    /// A tag chain runs past the end of the tag region.
    #[error("tag chain runs past the end of the tag region")]
    BadFormat,

    #[error("invalid record size {0}; must be 1-6")]
    InvalidSize(u8),

    #[error("tag id {0:#x} does not fit in 9 bits")]
    InvalidTagId(u16),

    #[error("tag value is empty")]
    EmptyValue,
}

impl TagError {
    /// Negative errno equivalent, for callers speaking the firmware's
    /// status-code convention.
    pub fn errno(&self) -> i32 {
        match self {
            TagError::NotFound => -2,
            TagError::Io => -5,
            TagError::BadFormat => -9,
            TagError::InvalidSize(_) | TagError::InvalidTagId(_) | TagError::EmptyValue => -22,
        }
    }
}

/// Tag types with a well-known meaning.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
#[repr(u16)]
pub enum TagType {
    BoardName = 1,
    BoardNumber = 2,
    BoardType = 3,
    MacAddress = 4,
    MacCount = 5,
    SerialNumber = 6,
    Strap = 7,
}

impl TagType {
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<TagType> {
        use strum::IntoEnumIterator;
        TagType::iter().find(|t| t.id() == id)
    }
}

/// Parses either a known tag name (`mac-address`) or a numeric id
/// (`4`, `0x104`).
pub fn parse_tag_id(s: &str) -> Result<u16, TagError> {
    if let Ok(t) = s.parse::<TagType>() {
        return Ok(t.id());
    }

    let id = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    }
    .map_err(|_| TagError::InvalidTagId(u16::MAX))?;

    if id > MAX_TAG_ID {
        return Err(TagError::InvalidTagId(id));
    }
    Ok(id)
}
