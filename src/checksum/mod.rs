//! Incremental CRC-32 and Adler-32 accumulators.
//!
//! Both engines implement [`Checksum`]. Feeding the same bytes in one call or
//! in many smaller calls yields the same value, and buffer views are walked
//! one chunk at a time so the backing storage of a [`bytes::Buf`] never
//! influences the result.

mod adler32;
mod crc32;

pub use adler32::Adler32;
pub use crc32::Crc32;

use bytes::Buf;

use crate::error::{ZipResult, check_range};

/// A running 32-bit checksum.
pub trait Checksum {
    /// Feed a single byte.
    fn update_byte(&mut self, byte: u8) {
        self.update(&[byte]);
    }

    /// Feed a whole slice.
    fn update(&mut self, data: &[u8]);

    /// Feed `length` bytes of `data` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ZipError::OutOfBounds`](crate::ZipError::OutOfBounds) when the
    /// range does not fit inside `data`; the checksum is left untouched.
    fn update_range(&mut self, data: &[u8], offset: usize, length: usize) -> ZipResult<()> {
        check_range(data.len(), offset, length)?;
        self.update(&data[offset..offset + length]);
        Ok(())
    }

    /// Feed every remaining byte of `buf`, advancing it to its end.
    fn update_buf<B: Buf>(&mut self, buf: &mut B)
    where
        Self: Sized,
    {
        while buf.has_remaining() {
            let chunk = buf.chunk();
            let len = chunk.len();
            self.update(chunk);
            buf.advance(len);
        }
    }

    /// Current checksum value.
    fn value(&self) -> u32;

    /// Return to the initial state.
    fn reset(&mut self);
}
