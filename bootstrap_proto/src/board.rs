// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Platform services the monitor calls into.
//!
//! Everything here is hardware-specific and lives outside the protocol:
//! OTP access, image authentication, boot media, SJTAG. Operations a
//! platform does not offer keep the default implementation, which reports
//! [`BoardError::NotSupported`] and turns into a NACK on the wire.

use crate::cmd::SJTAG_LEN;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardError {
    #[error("operation not supported on this board")]
    NotSupported,

    #[error("offset or length out of range")]
    OutOfRange,

    #[error("image failed authentication")]
    AuthFailed,

    #[error("hardware operation failed")]
    Failed,
}

pub trait Board {
    /// Firmware version string returned for the version query.
    fn version(&self) -> &str;

    /// Overrides the boot strapping value sampled at reset.
    fn set_strapping(&mut self, value: u32) -> Result<(), BoardError> {
        let _ = value;
        Err(BoardError::NotSupported)
    }

    /// Authenticates a downloaded image and loads it for execution.
    fn authenticate(&mut self, image: &[u8]) -> Result<(), BoardError> {
        let _ = image;
        Err(BoardError::NotSupported)
    }

    /// Programs `data` at OTP byte `offset`. Bits can only be set.
    fn otp_program(&mut self, offset: u32, data: &[u8]) -> Result<(), BoardError> {
        let _ = (offset, data);
        Err(BoardError::NotSupported)
    }

    /// Programs `len` bytes of on-chip generated random data at `offset`.
    fn otp_program_random(&mut self, offset: u32, len: u32) -> Result<(), BoardError> {
        let _ = (offset, len);
        Err(BoardError::NotSupported)
    }

    /// Burns the contents of the OTP emulation into the real OTP.
    fn otp_commit_emulation(&mut self) -> Result<(), BoardError> {
        Err(BoardError::NotSupported)
    }

    /// Reads OTP, either as seen through the emulation layer or raw.
    fn otp_read(&mut self, offset: u32, buf: &mut [u8], emulated: bool) -> Result<(), BoardError> {
        let _ = (offset, buf, emulated);
        Err(BoardError::NotSupported)
    }

    /// A fresh random SJTAG challenge.
    fn sjtag_nonce(&mut self) -> Result<[u8; SJTAG_LEN], BoardError> {
        Err(BoardError::NotSupported)
    }

    /// The key an SJTAG response is computed against.
    fn sjtag_key(&self) -> Result<[u8; SJTAG_LEN], BoardError> {
        Err(BoardError::NotSupported)
    }

    /// Opens the debug port after a successful challenge/response.
    fn sjtag_unlock(&mut self) -> Result<(), BoardError> {
        Err(BoardError::NotSupported)
    }

    /// Writes a FIP image to the boot media.
    fn write_fip(&mut self, image: &[u8]) -> Result<(), BoardError> {
        let _ = image;
        Err(BoardError::NotSupported)
    }

    /// Writes an image verbatim at `offset` on the boot media.
    fn write_raw(&mut self, offset: u32, image: &[u8]) -> Result<(), BoardError> {
        let _ = (offset, image);
        Err(BoardError::NotSupported)
    }

    /// Encrypts a FIP image with the device-unique key and writes it.
    fn bind_fip(&mut self, image: &[u8]) -> Result<(), BoardError> {
        let _ = image;
        Err(BoardError::NotSupported)
    }

    /// Resets the SoC. Real hardware does not come back from this.
    fn reset(&mut self) {}
}
impl dyn Board {} // Ensure object-safe.
