// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::header::{TagHeader, TagRecord};
use crate::{TagError, MAX_TAG_ID, RECORD_DATA, RECORD_SIZE};

/// Splits `value` into a chain of records for `tag_id`.
///
/// Every record except the last carries six data bytes and has the
/// continuation bit set.
pub fn encode(tag_id: u16, value: &[u8]) -> Result<Vec<TagRecord>, TagError> {
    if value.is_empty() {
        return Err(TagError::EmptyValue);
    }
    if tag_id > MAX_TAG_ID {
        return Err(TagError::InvalidTagId(tag_id));
    }

    let count = value.len().div_ceil(RECORD_DATA);
    value
        .chunks(RECORD_DATA)
        .enumerate()
        .map(|(i, chunk)| {
            let header = TagHeader {
                size: chunk.len() as u8,
                continuation: i + 1 < count,
                tag_id,
            };
            TagRecord::build(header, chunk)
        })
        .collect()
}

/// Flattens a chain into the bytes to program into OTP.
pub fn to_bytes(records: &[TagRecord]) -> Vec<u8> {
    let mut v = Vec::with_capacity(records.len() * RECORD_SIZE);
    for r in records {
        v.extend_from_slice(&r.raw);
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TagStore;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn short_value_is_one_record() {
        let records = encode(4, &[1, 2, 3]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].raw, [1, 2, 3, 0, 0, 0, 0x04, 0x60]);
    }

    #[test]
    fn exact_multiple_has_no_trailing_record() {
        let records = encode(2, &[0; 12]).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].header().unwrap().continuation);
        assert!(!records[1].header().unwrap().continuation);
        assert_eq!(records[1].header().unwrap().size, 6);
    }

    #[test]
    fn rejects_empty_and_wide_ids() {
        assert_eq!(encode(1, &[]), Err(TagError::EmptyValue));
        assert_eq!(encode(0x200, &[1]), Err(TagError::InvalidTagId(0x200)));
    }

    proptest! {
        #[test]
        fn encoded_values_read_back(tag_id in 0u16..=MAX_TAG_ID, value in proptest::collection::vec(any::<u8>(), 1..64)) {
            let blob = to_bytes(&encode(tag_id, &value).unwrap());
            let store = TagStore::with_region(&blob[..], 0, blob.len());
            let mut buf = vec![0u8; value.len()];
            prop_assert_eq!(store.get(tag_id, &mut buf), Ok(value.len()));
            prop_assert_eq!(buf, value);
        }
    }
}
