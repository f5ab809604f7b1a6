// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lookup of tag values in the OTP tag region.
//!
//! Records are packed at 8-byte offsets from [`TAG_START`] to [`TAG_END`].
//! A value longer than six bytes is stored as a chain: every record but the
//! last has its continuation bit set, and the next record lives at the
//! following offset. The scan never reads a continuation record as the start
//! of a new tag.

use crate::header::{TagHeader, TagRecord};
use crate::{TagError, RECORD_SIZE, TAG_END, TAG_START};
use log::{debug, trace};

/// Source of raw OTP bytes.
pub trait OtpSource {
    /// Fills `buf` with the OTP contents starting at byte `offset`.
    fn read_otp(&self, offset: usize, buf: &mut [u8]) -> Result<(), TagError>;
}

impl OtpSource for [u8] {
    fn read_otp(&self, offset: usize, buf: &mut [u8]) -> Result<(), TagError> {
        let src = offset
            .checked_add(buf.len())
            .and_then(|end| self.get(offset..end))
            .ok_or(TagError::Io)?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

impl OtpSource for Vec<u8> {
    fn read_otp(&self, offset: usize, buf: &mut [u8]) -> Result<(), TagError> {
        self.as_slice().read_otp(offset, buf)
    }
}

impl<S: OtpSource + ?Sized> OtpSource for &S {
    fn read_otp(&self, offset: usize, buf: &mut [u8]) -> Result<(), TagError> {
        S::read_otp(*self, offset, buf)
    }
}

/// Read-only view of the tag region of an OTP.
pub struct TagStore<S> {
    otp: S,
    start: usize,
    end: usize,
}

impl<S: OtpSource> TagStore<S> {
    /// A store over the standard tag region, `TAG_START..TAG_END`.
    pub fn new(otp: S) -> TagStore<S> {
        TagStore::with_region(otp, TAG_START, TAG_END)
    }

    /// A store over an arbitrary region. Used when the source only holds the
    /// tag region itself (e.g. a dump starting at offset 0).
    pub fn with_region(otp: S, start: usize, end: usize) -> TagStore<S> {
        TagStore { otp, start, end }
    }

    fn read_record(&self, offset: usize) -> Result<TagRecord, TagError> {
        let mut raw = [0u8; RECORD_SIZE];
        self.otp.read_otp(offset, &mut raw)?;
        Ok(TagRecord::new(raw))
    }

    /// Looks up the value stored for `tag_id` and copies it into `buf`.
    ///
    /// Returns the number of bytes copied, which is capped at `buf.len()`:
    /// a value longer than the buffer is silently truncated. Any part of
    /// `buf` beyond the copied bytes is zeroed.
    pub fn get(&self, tag_id: u16, buf: &mut [u8]) -> Result<usize, TagError> {
        let mut offset = self.start;

        while offset + RECORD_SIZE <= self.end {
            let record = self.read_record(offset)?;
            let header = match record.header() {
                Some(h) => h,
                None => {
                    offset += RECORD_SIZE;
                    continue;
                }
            };

            if header.tag_id == tag_id {
                debug!("tag {tag_id:#x} found at {offset:#x}");
                return self.get_value(&record, offset, buf);
            }

            offset = self.skip_chain(header, offset)?;
        }

        Err(TagError::NotFound)
    }

    /// Assembles the value that starts with `record` (located at `offset`)
    /// into `buf`, following continuation records while space remains.
    pub fn get_value(
        &self,
        record: &TagRecord,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<usize, TagError> {
        buf.fill(0);

        let mut record = *record;
        let mut offset = offset;
        let mut copied = 0;

        loop {
            let header = record.header().ok_or(TagError::Io)?;
            let n = header.size_in_bytes().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&record.raw[..n]);
            copied += n;

            if !header.continuation || copied == buf.len() {
                return Ok(copied);
            }

            offset += RECORD_SIZE;
            if offset + RECORD_SIZE > self.end {
                return Err(TagError::BadFormat);
            }
            record = self.read_record(offset)?;
            trace!("continuation at {offset:#x}: {:02x?}", record.raw);
        }
    }

    /// Returns the offset just past the chain headed by `header` at `offset`.
    fn skip_chain(&self, header: TagHeader, offset: usize) -> Result<usize, TagError> {
        let mut header = header;
        let mut offset = offset;

        while header.continuation {
            offset += RECORD_SIZE;
            if offset + RECORD_SIZE > self.end {
                // A dangling chain at the end of the region holds no more tags
                return Ok(self.end);
            }
            header = match self.read_record(offset)?.header() {
                Some(h) => h,
                // A broken chain ends here; resume the scan at this record
                None => return Ok(offset),
            };
        }

        Ok(offset + RECORD_SIZE)
    }

    /// Walks every valid tag chain in the region.
    pub fn iter(&self) -> TagIter<'_, S> {
        TagIter {
            store: self,
            offset: self.start,
        }
    }
}

/// One assembled tag chain found by [`TagStore::iter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    pub offset: usize,
    pub tag_id: u16,
    /// Number of records in the chain.
    pub records: usize,
    pub value: Vec<u8>,
}

pub struct TagIter<'a, S> {
    store: &'a TagStore<S>,
    offset: usize,
}

impl<S: OtpSource> Iterator for TagIter<'_, S> {
    type Item = Result<TagEntry, TagError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset + RECORD_SIZE <= self.store.end {
            let offset = self.offset;
            let record = match self.store.read_record(offset) {
                Ok(r) => r,
                Err(e) => {
                    self.offset = self.store.end;
                    return Some(Err(e));
                }
            };
            let header = match record.header() {
                Some(h) => h,
                None => {
                    self.offset += RECORD_SIZE;
                    continue;
                }
            };

            let mut value = Vec::new();
            let mut at = offset;
            let mut current = header;
            let mut current_record = record;
            loop {
                value.extend_from_slice(&current_record.raw[..current.size_in_bytes()]);
                if !current.continuation {
                    break;
                }
                at += RECORD_SIZE;
                let next = if at + RECORD_SIZE > self.store.end {
                    Err(TagError::BadFormat)
                } else {
                    self.store.read_record(at).and_then(|r| {
                        r.header().map(|h| (r, h)).ok_or(TagError::Io)
                    })
                };
                match next {
                    Ok((r, h)) => {
                        current_record = r;
                        current = h;
                    }
                    Err(e) => {
                        self.offset = at;
                        return Some(Err(e));
                    }
                }
            }

            self.offset = at + RECORD_SIZE;
            return Some(Ok(TagEntry {
                offset,
                tag_id: header.tag_id,
                records: (at - offset) / RECORD_SIZE + 1,
                value,
            }));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode;
    use crate::OTP_SIZE;
    use pretty_assertions::assert_eq;

    const TAG_A: u16 = 0x10;
    const TAG_B: u16 = 0x111;
    const TAG_C: u16 = 0x20;

    fn place(otp: &mut [u8], offset: usize, records: &[TagRecord]) -> usize {
        let mut at = offset;
        for r in records {
            otp[at..at + RECORD_SIZE].copy_from_slice(&r.raw);
            at += RECORD_SIZE;
        }
        at
    }

    /// Tag A (one record, 3 bytes), an invalid record, then tag B (two
    /// records, 10 bytes).
    fn sample_otp() -> Vec<u8> {
        let mut otp = vec![0u8; OTP_SIZE];
        let mut at = place(&mut otp, TAG_START, &encode(TAG_A, &[0xa1, 0xa2, 0xa3]).unwrap());
        // size field 7 with the tag id of C
        otp[at..at + RECORD_SIZE].copy_from_slice(&[0xc0, 0xc1, 0xc2, 0xc3, 0xc4, 0xc5, 0x20, 0xe0]);
        at += RECORD_SIZE;
        place(&mut otp, at, &encode(TAG_B, &(0xb0..0xba).collect::<Vec<u8>>()).unwrap());
        otp
    }

    #[test]
    fn single_record_tag() {
        let otp = sample_otp();
        let store = TagStore::new(&otp[..]);
        let mut buf = [0xffu8; 8];
        assert_eq!(store.get(TAG_A, &mut buf), Ok(3));
        assert_eq!(buf, [0xa1, 0xa2, 0xa3, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn chained_tag_is_concatenated() {
        let otp = sample_otp();
        let store = TagStore::new(&otp[..]);
        let mut buf = [0xffu8; 12];
        assert_eq!(store.get(TAG_B, &mut buf), Ok(10));
        assert_eq!(
            buf,
            [0xb0, 0xb1, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6, 0xb7, 0xb8, 0xb9, 0, 0]
        );
    }

    #[test]
    fn invalid_record_is_not_a_match() {
        let otp = sample_otp();
        let store = TagStore::new(&otp[..]);
        let mut buf = [0u8; 8];
        assert_eq!(store.get(TAG_C, &mut buf), Err(TagError::NotFound));
    }

    #[test]
    fn truncates_to_buffer() {
        let otp = sample_otp();
        let store = TagStore::new(&otp[..]);
        let mut buf = [0u8; 8];
        assert_eq!(store.get(TAG_B, &mut buf), Ok(8));
        assert_eq!(buf, [0xb0, 0xb1, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6, 0xb7]);

        let mut buf = [0u8; 2];
        assert_eq!(store.get(TAG_A, &mut buf), Ok(2));
        assert_eq!(buf, [0xa1, 0xa2]);
    }

    #[test]
    fn continuation_records_are_not_tag_headers() {
        // The second record of tag B's chain claims to be tag A; it must be
        // skipped along with the rest of the chain.
        let mut otp = vec![0u8; OTP_SIZE];
        let mut chain = encode(TAG_B, &[1, 2, 3, 4, 5, 6, 7]).unwrap();
        chain[1] = TagRecord::build(
            TagHeader {
                size: 1,
                continuation: false,
                tag_id: TAG_A,
            },
            &[7],
        )
        .unwrap();
        let at = place(&mut otp, TAG_START, &chain);
        place(&mut otp, at, &encode(TAG_A, &[0x55]).unwrap());

        let store = TagStore::new(&otp[..]);
        let mut buf = [0u8; 4];
        assert_eq!(store.get(TAG_A, &mut buf), Ok(1));
        assert_eq!(buf, [0x55, 0, 0, 0]);
    }

    #[test]
    fn broken_continuation_is_io_error() {
        let mut otp = vec![0u8; OTP_SIZE];
        let chain = encode(TAG_B, &[1, 2, 3, 4, 5, 6, 7]).unwrap();
        // Only the head; the continuation record stays blank.
        place(&mut otp, TAG_START, &chain[..1]);

        let store = TagStore::new(&otp[..]);
        let mut buf = [0u8; 16];
        assert_eq!(store.get(TAG_B, &mut buf), Err(TagError::Io));
    }

    #[test]
    fn chain_off_the_end_is_bad_format() {
        let mut otp = vec![0u8; OTP_SIZE];
        let chain = encode(TAG_B, &[1, 2, 3, 4, 5, 6, 7]).unwrap();
        place(&mut otp, TAG_END - RECORD_SIZE, &chain[..1]);

        let store = TagStore::new(&otp[..]);
        let mut buf = [0u8; 16];
        assert_eq!(store.get(TAG_B, &mut buf), Err(TagError::BadFormat));
    }

    #[test]
    fn short_source_is_io_error() {
        let otp = vec![0u8; TAG_START + 16];
        let store = TagStore::new(&otp[..]);
        let mut buf = [0u8; 4];
        assert_eq!(store.get(TAG_A, &mut buf), Err(TagError::Io));
    }

    #[test]
    fn iter_lists_every_chain() {
        let otp = sample_otp();
        let store = TagStore::new(&otp[..]);
        let entries: Vec<TagEntry> = store.iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(
            entries,
            vec![
                TagEntry {
                    offset: TAG_START,
                    tag_id: TAG_A,
                    records: 1,
                    value: vec![0xa1, 0xa2, 0xa3],
                },
                TagEntry {
                    offset: TAG_START + 2 * RECORD_SIZE,
                    tag_id: TAG_B,
                    records: 2,
                    value: (0xb0..0xba).collect(),
                },
            ]
        );
    }
}
