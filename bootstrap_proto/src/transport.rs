// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::{Read, Write};

/// Byte stream the protocol runs over.
///
/// Reads block until a byte arrives; any timeout is the transport's
/// business and surfaces as an error.
pub trait Transport {
    fn read_byte(&mut self) -> std::io::Result<u8>;

    fn write_byte(&mut self, byte: u8) -> std::io::Result<()>;

    fn flush(&mut self) -> std::io::Result<()>;

    fn read_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        for b in buf.iter_mut() {
            *b = self.read_byte()?;
        }
        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> std::io::Result<()> {
        for b in data {
            self.write_byte(*b)?;
        }
        Ok(())
    }
}

// Serial ports, sockets and in-memory buffers all come through here.
impl<T: Read + Write + ?Sized> Transport for T {
    fn read_byte(&mut self) -> std::io::Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    fn write_byte(&mut self, byte: u8) -> std::io::Result<()> {
        self.write_all(&[byte])
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Write::flush(self)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.read_exact(buf)
    }

    fn write_bytes(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.write_all(data)
    }
}
