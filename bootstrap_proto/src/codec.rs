// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ASCII-hex helpers for the text parts of a frame.
//!
//! Numeric fields are eight hex digits, most significant byte first. The
//! device emits upper case and accepts either case.

/// Width of a hex-encoded `u32` field.
pub const HEX_FIELD_LEN: usize = 8;

/// Formats `value` as an 8-digit field.
pub fn hex2str(value: u32) -> [u8; HEX_FIELD_LEN] {
    let mut out = [0u8; HEX_FIELD_LEN];
    out.copy_from_slice(hex::encode_upper(value.to_be_bytes()).as_bytes());
    out
}

/// Parses an 8-digit field. Returns `None` if any character is not a hex
/// digit.
pub fn atohex(field: &[u8; HEX_FIELD_LEN]) -> Option<u32> {
    let mut bytes = [0u8; 4];
    hex::decode_to_slice(field, &mut bytes).ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Decodes one payload byte sent as a pair of hex digits.
pub fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let mut out = [0u8; 1];
    hex::decode_to_slice([hi, lo], &mut out).ok()?;
    Some(out[0])
}

/// Encodes a payload as hex digit pairs, two characters per byte.
pub fn hex_pairs(data: &[u8]) -> Vec<u8> {
    hex::encode_upper(data).into_bytes()
}
