// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CRC32C (Castagnoli) as used by the bootstrap protocol.
//!
//! The firmware convention is a seeded CRC: the register starts at `!seed`
//! and the result is complemented on the way out, so a seed of 0 gives the
//! standard CRC32C and a previous result can be fed back in as the seed:
//!
//! `crc32c(s, a ++ b) == crc32c(crc32c(s, a), b)`

use crc::{Crc, CRC_32_ISCSI};

// CRC_32_ISCSI is CRC32C: poly 0x1edc6f41, reflected, init and xorout all
// ones.
static CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Computes the CRC32C of `data`, continuing from `seed`.
pub fn crc32c(seed: u32, data: &[u8]) -> u32 {
    // The crc crate takes its initial value in unreflected form and
    // reflects it for reflected algorithms. Pre-reflect so the register
    // starts out holding exactly `!seed`.
    let mut digest = CASTAGNOLI.digest_with_initial((!seed).reverse_bits());
    digest.update(data);
    digest.finalize()
}

/// A running CRC32C accumulated over several discontiguous pieces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc32c(u32);

impl Crc32c {
    pub fn new() -> Crc32c {
        Crc32c(0)
    }

    pub fn digest(&mut self, data: &[u8]) {
        self.0 = crc32c(self.0, data);
    }

    pub fn get_crc(&self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn check_value() {
        assert_eq!(crc32c(0, b"123456789"), 0xe306_9283);
    }

    #[test]
    fn empty_input_returns_seed() {
        assert_eq!(crc32c(0, &[]), 0);
        assert_eq!(crc32c(0xdead_beef, &[]), 0xdead_beef);
    }

    #[test]
    fn known_vectors() {
        // RFC 3720 B.4
        assert_eq!(crc32c(0, &[0u8; 32]), 0x8a91_36aa);
        assert_eq!(crc32c(0, &[0xffu8; 32]), 0x62a8_ab43);
        let ascending: Vec<u8> = (0..32).collect();
        assert_eq!(crc32c(0, &ascending), 0x46dd_794e);
    }

    #[test]
    fn running_matches_oneshot() {
        let mut crc = Crc32c::new();
        crc.digest(b"V,00000000,");
        crc.digest(b"00000000#");
        assert_eq!(crc.get_crc(), crc32c(0, b"V,00000000,00000000#"));
    }

    proptest! {
        #[test]
        fn deterministic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assert_eq!(crc32c(0, &data), crc32c(0, &data));
        }

        #[test]
        fn composable(
            seed in any::<u32>(),
            data in proptest::collection::vec(any::<u8>(), 0..256),
            split in any::<prop::sample::Index>(),
        ) {
            let at = split.index(data.len() + 1);
            let (a, b) = data.split_at(at);
            prop_assert_eq!(crc32c(seed, &data), crc32c(crc32c(seed, a), b));
        }
    }
}
