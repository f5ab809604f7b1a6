// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A [`Board`] held entirely in memory, for bench testing host tools without
//! hardware.
//!
//! OTP writes land in an emulation layer first; reads through the emulation
//! see the raw OTP with the emulated bits OR'd in, and committing the
//! emulation burns those bits into the raw OTP. An image authenticates if its
//! last 32 bytes are the SHA-256 of everything before them.

use crate::board::{Board, BoardError};
use crate::cmd::SJTAG_LEN;
use log::info;
use otp_tags::OTP_SIZE;
use sha2::{Digest, Sha256};

const DIGEST_LEN: usize = 32;
/// Largest boot media the simulator will grow to.
pub const MEDIA_SIZE: usize = 64 << 20;

pub struct SimBoard {
    pub version: String,
    pub otp: Vec<u8>,
    pub otp_emulation: Vec<u8>,
    /// Boot media contents, grown on demand by raw writes.
    pub media: Vec<u8>,
    pub fip: Option<Vec<u8>>,
    pub bound: bool,
    pub strapping: Option<u32>,
    pub authenticated: bool,
    pub sjtag_key: [u8; SJTAG_LEN],
    pub sjtag_unlocked: bool,
    pub resets: u32,
    entropy: [u8; 32],
    counter: u64,
}

impl SimBoard {
    pub fn new() -> SimBoard {
        SimBoard {
            version: concat!("bootstrap-sim ", env!("CARGO_PKG_VERSION")).to_string(),
            otp: vec![0; OTP_SIZE],
            otp_emulation: vec![0; OTP_SIZE],
            media: Vec::new(),
            fip: None,
            bound: false,
            strapping: None,
            authenticated: false,
            sjtag_key: [0; SJTAG_LEN],
            sjtag_unlocked: false,
            resets: 0,
            entropy: [0x5a; 32],
            counter: 0,
        }
    }

    /// Starts from an existing OTP image (shorter images are zero-extended).
    pub fn with_otp(mut self, image: &[u8]) -> SimBoard {
        let n = image.len().min(OTP_SIZE);
        self.otp[..n].copy_from_slice(&image[..n]);
        self
    }

    pub fn with_sjtag_key(mut self, key: [u8; SJTAG_LEN]) -> SimBoard {
        self.sjtag_key = key;
        self
    }

    /// Appends the digest that makes `body` pass [`Board::authenticate`].
    pub fn seal_image(body: &[u8]) -> Vec<u8> {
        let mut v = body.to_vec();
        v.extend_from_slice(&Sha256::digest(body));
        v
    }

    /// Deterministic stand-in for a hardware TRNG.
    fn random(&mut self, out: &mut [u8]) {
        for chunk in out.chunks_mut(DIGEST_LEN) {
            let mut hasher = Sha256::new();
            hasher.update(self.entropy);
            hasher.update(self.counter.to_le_bytes());
            self.counter += 1;
            let block = hasher.finalize();
            chunk.copy_from_slice(&block[..chunk.len()]);
        }
    }

    fn otp_range(offset: u32, len: usize) -> Result<std::ops::Range<usize>, BoardError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(BoardError::OutOfRange)?;
        if end > OTP_SIZE {
            return Err(BoardError::OutOfRange);
        }
        Ok(start..end)
    }
}

impl Default for SimBoard {
    fn default() -> Self {
        SimBoard::new()
    }
}

impl Board for SimBoard {
    fn version(&self) -> &str {
        &self.version
    }

    fn set_strapping(&mut self, value: u32) -> Result<(), BoardError> {
        info!("strapping overridden to {value:#x}");
        self.strapping = Some(value);
        Ok(())
    }

    fn authenticate(&mut self, image: &[u8]) -> Result<(), BoardError> {
        if image.len() <= DIGEST_LEN {
            return Err(BoardError::AuthFailed);
        }
        let (body, digest) = image.split_at(image.len() - DIGEST_LEN);
        if Sha256::digest(body).as_slice() != digest {
            return Err(BoardError::AuthFailed);
        }
        self.authenticated = true;
        Ok(())
    }

    fn otp_program(&mut self, offset: u32, data: &[u8]) -> Result<(), BoardError> {
        let range = SimBoard::otp_range(offset, data.len())?;
        for (cell, b) in self.otp_emulation[range].iter_mut().zip(data) {
            *cell |= *b;
        }
        Ok(())
    }

    fn otp_program_random(&mut self, offset: u32, len: u32) -> Result<(), BoardError> {
        SimBoard::otp_range(offset, len as usize)?;
        let mut data = vec![0u8; len as usize];
        self.random(&mut data);
        self.otp_program(offset, &data)
    }

    fn otp_commit_emulation(&mut self) -> Result<(), BoardError> {
        for (cell, b) in self.otp.iter_mut().zip(self.otp_emulation.iter_mut()) {
            *cell |= *b;
            *b = 0;
        }
        Ok(())
    }

    fn otp_read(&mut self, offset: u32, buf: &mut [u8], emulated: bool) -> Result<(), BoardError> {
        let range = SimBoard::otp_range(offset, buf.len())?;
        buf.copy_from_slice(&self.otp[range.clone()]);
        if emulated {
            for (out, b) in buf.iter_mut().zip(&self.otp_emulation[range]) {
                *out |= *b;
            }
        }
        Ok(())
    }

    fn sjtag_nonce(&mut self) -> Result<[u8; SJTAG_LEN], BoardError> {
        let mut nonce = [0u8; SJTAG_LEN];
        self.random(&mut nonce);
        Ok(nonce)
    }

    fn sjtag_key(&self) -> Result<[u8; SJTAG_LEN], BoardError> {
        Ok(self.sjtag_key)
    }

    fn sjtag_unlock(&mut self) -> Result<(), BoardError> {
        self.sjtag_unlocked = true;
        Ok(())
    }

    fn write_fip(&mut self, image: &[u8]) -> Result<(), BoardError> {
        self.fip = Some(image.to_vec());
        self.bound = false;
        Ok(())
    }

    fn write_raw(&mut self, offset: u32, image: &[u8]) -> Result<(), BoardError> {
        let start = offset as usize;
        let end = start + image.len();
        if end > MEDIA_SIZE {
            return Err(BoardError::OutOfRange);
        }
        if self.media.len() < end {
            self.media.resize(end, 0xff);
        }
        self.media[start..end].copy_from_slice(image);
        Ok(())
    }

    fn bind_fip(&mut self, image: &[u8]) -> Result<(), BoardError> {
        self.write_fip(image)?;
        self.bound = true;
        Ok(())
    }

    fn reset(&mut self) {
        info!("reset requested");
        self.resets += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_images_authenticate() {
        let mut board = SimBoard::new();
        let mut image = SimBoard::seal_image(b"firmware");
        assert_eq!(board.authenticate(&image), Ok(()));
        image[0] ^= 1;
        assert_eq!(board.authenticate(&image), Err(BoardError::AuthFailed));
        assert_eq!(board.authenticate(&[0; 32]), Err(BoardError::AuthFailed));
    }

    #[test]
    fn otp_emulation_layers() {
        let mut board = SimBoard::new();
        board.otp[0x10] = 0x01;
        board.otp_program(0x10, &[0x80, 0x02]).unwrap();

        let mut buf = [0u8; 2];
        board.otp_read(0x10, &mut buf, false).unwrap();
        assert_eq!(buf, [0x01, 0x00]);
        board.otp_read(0x10, &mut buf, true).unwrap();
        assert_eq!(buf, [0x81, 0x02]);

        board.otp_commit_emulation().unwrap();
        board.otp_read(0x10, &mut buf, false).unwrap();
        assert_eq!(buf, [0x81, 0x02]);
        assert!(board.otp_emulation.iter().all(|b| *b == 0));
    }

    #[test]
    fn otp_bounds() {
        let mut board = SimBoard::new();
        assert_eq!(
            board.otp_program(OTP_SIZE as u32 - 1, &[1, 2]),
            Err(BoardError::OutOfRange)
        );
        assert_eq!(
            board.otp_program_random(u32::MAX, 4),
            Err(BoardError::OutOfRange)
        );
    }

    #[test]
    fn nonces_differ() {
        let mut board = SimBoard::new();
        assert_ne!(board.sjtag_nonce().unwrap(), board.sjtag_nonce().unwrap());
    }
}
