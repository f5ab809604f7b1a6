// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TOML manifests describing a set of tags to program.
//!
//! ```toml
//! base = 0x1000
//!
//! [[tag]]
//! type = "board-name"
//! text = "pcb8398"
//!
//! [[tag]]
//! type = "mac-address"
//! hex = "00:01:c1:00:00:a0"
//! ```

use crate::encode::{encode, to_bytes};
use crate::{parse_tag_id, TagError, RECORD_SIZE, TAG_END, TAG_START};
use log::debug;
use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum ProvisionError {
    #[error("manifest parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("tag {index}: {source}")]
    Tag {
        index: usize,
        #[source]
        source: TagError,
    },

    #[error("tag {0}: exactly one of `hex` or `text` is required")]
    Value(usize),

    #[error("tag {index}: bad hex value: {source}")]
    Hex {
        index: usize,
        #[source]
        source: hex::FromHexError,
    },

    #[error("base {0:#x} is not an 8-byte aligned offset in the tag region")]
    Base(usize),

    #[error("{len} bytes of tags at {base:#x} overflow the tag region")]
    Overflow { base: usize, len: usize },
}

fn default_base() -> usize {
    TAG_START
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// OTP offset the first record is programmed at.
    #[serde(default = "default_base")]
    pub base: usize,
    #[serde(rename = "tag", default)]
    pub tags: Vec<TagSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagSpec {
    /// Known tag name or numeric id.
    #[serde(rename = "type")]
    pub tag_type: String,
    /// Value as hex; `:` and whitespace separators are ignored.
    pub hex: Option<String>,
    /// Value as a UTF-8 string, stored without a terminator.
    pub text: Option<String>,
}

impl TagSpec {
    fn value(&self, index: usize) -> Result<Vec<u8>, ProvisionError> {
        match (&self.hex, &self.text) {
            (Some(h), None) => {
                let digits: String = h
                    .chars()
                    .filter(|c| *c != ':' && !c.is_whitespace())
                    .collect();
                hex::decode(digits).map_err(|source| ProvisionError::Hex { index, source })
            }
            (None, Some(t)) => Ok(t.as_bytes().to_vec()),
            _ => Err(ProvisionError::Value(index)),
        }
    }
}

impl Manifest {
    pub fn from_toml(s: &str) -> Result<Manifest, ProvisionError> {
        Ok(toml::from_str(s)?)
    }

    /// Encodes every tag, in order, into one contiguous blob meant to be
    /// programmed at `self.base`.
    pub fn render(&self) -> Result<Vec<u8>, ProvisionError> {
        if self.base < TAG_START || self.base >= TAG_END || self.base % RECORD_SIZE != 0 {
            return Err(ProvisionError::Base(self.base));
        }

        let mut blob = Vec::new();
        for (index, spec) in self.tags.iter().enumerate() {
            let tag_id =
                parse_tag_id(&spec.tag_type).map_err(|source| ProvisionError::Tag { index, source })?;
            let value = spec.value(index)?;
            let records =
                encode(tag_id, &value).map_err(|source| ProvisionError::Tag { index, source })?;
            debug!(
                "tag {index}: id {tag_id:#x}, {} bytes in {} records",
                value.len(),
                records.len()
            );
            blob.extend_from_slice(&to_bytes(&records));
        }

        if self.base + blob.len() > TAG_END {
            return Err(ProvisionError::Overflow {
                base: self.base,
                len: blob.len(),
            });
        }

        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TagStore, TagType, OTP_SIZE};
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = r#"
        base = 0x1010

        [[tag]]
        type = "board-name"
        text = "pcb8398"

        [[tag]]
        type = "mac-address"
        hex = "00:01:c1:00:00:a0"

        [[tag]]
        type = "0x150"
        hex = "deadbeef"
    "#;

    #[test]
    fn rendered_manifest_reads_back() {
        let manifest = Manifest::from_toml(MANIFEST).unwrap();
        assert_eq!(manifest.base, 0x1010);
        let blob = manifest.render().unwrap();
        // 7 bytes -> 2 records, 6 bytes -> 1, 4 bytes -> 1
        assert_eq!(blob.len(), 4 * RECORD_SIZE);

        let mut otp = vec![0u8; OTP_SIZE];
        otp[manifest.base..manifest.base + blob.len()].copy_from_slice(&blob);
        let store = TagStore::new(&otp[..]);

        let mut buf = [0u8; 16];
        let n = store.get(TagType::BoardName.id(), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"pcb8398");
        let n = store.get(TagType::MacAddress.id(), &mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x00, 0x01, 0xc1, 0x00, 0x00, 0xa0]);
        let n = store.get(0x150, &mut buf).unwrap();
        assert_eq!(&buf[..n], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn default_base_is_tag_start() {
        let manifest = Manifest::from_toml("[[tag]]\ntype = \"strap\"\nhex = \"01\"\n").unwrap();
        assert_eq!(manifest.base, TAG_START);
    }

    #[test]
    fn rejects_bad_manifests() {
        let both = "[[tag]]\ntype = \"strap\"\nhex = \"01\"\ntext = \"x\"\n";
        assert!(matches!(
            Manifest::from_toml(both).unwrap().render(),
            Err(ProvisionError::Value(0))
        ));

        let unaligned = "base = 0x1001\n";
        assert!(matches!(
            Manifest::from_toml(unaligned).unwrap().render(),
            Err(ProvisionError::Base(0x1001))
        ));

        let unknown = "[[tag]]\ntype = \"bogus\"\ntext = \"x\"\n";
        assert!(matches!(
            Manifest::from_toml(unknown).unwrap().render(),
            Err(ProvisionError::Tag { index: 0, .. })
        ));

        assert!(matches!(
            Manifest::from_toml("colour = 1\n"),
            Err(ProvisionError::Parse(_))
        ));
    }
}
