//! Streaming DEFLATE (RFC 1951) compression and decompression, with the
//! optional zlib (RFC 1950) wrapper.
//!
//! ## Architecture
//!
//! - [`bits`]: LSB-first bit writer and a checkpointable bit reader
//! - [`huffman`]: length-limited code construction and canonical decoding
//! - [`lz77`]: hash-chain match finder over a 32 KiB sliding window
//! - [`Deflater`] / [`Inflater`]: the stateful sessions
//!
//! Both sessions are driven the same way: hand them input with
//! `set_input`, then call `deflate`/`inflate` with an output buffer of any
//! size until they report `needs_input()` or `finished()`. Neither session
//! ever writes more than fits in the buffer it is given; surplus output is
//! queued internally and handed out on the next call.

mod bits;
mod deflater;
mod huffman;
mod inflater;
mod lz77;

pub use deflater::Deflater;
pub use inflater::Inflater;

use crate::error::{ZipError, ZipResult};

/// Size of the sliding window (history) in bytes.
pub(crate) const WINDOW_SIZE: usize = 32 * 1024;
pub(crate) const MIN_MATCH: usize = 3;
pub(crate) const MAX_MATCH: usize = 258;

/// End-of-block symbol in the literal/length alphabet.
pub(crate) const END_OF_BLOCK: usize = 256;
pub(crate) const NUM_LITLEN_SYMBOLS: usize = 286;
pub(crate) const NUM_DIST_SYMBOLS: usize = 30;
pub(crate) const NUM_CODELEN_SYMBOLS: usize = 19;

/// Base lengths for symbols 257..=285.
pub(crate) const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115,
    131, 163, 195, 227, 258,
];

/// Extra bits for symbols 257..=285.
pub(crate) const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

/// Base distances for symbols 0..=29.
pub(crate) const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];

pub(crate) const DIST_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

/// Transmission order of the code length code lengths.
pub(crate) const CODELEN_ORDER: [usize; NUM_CODELEN_SYMBOLS] =
    [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

/// Code lengths of the fixed literal/length code (RFC 1951 3.2.6).
pub(crate) fn fixed_litlen_lengths() -> [u8; 288] {
    let mut lengths = [0u8; 288];
    for (sym, len) in lengths.iter_mut().enumerate() {
        *len = match sym {
            0..=143 => 8,
            144..=255 => 9,
            256..=279 => 7,
            _ => 8,
        };
    }
    lengths
}

pub(crate) fn fixed_dist_lengths() -> [u8; 32] {
    [5; 32]
}

/// Compression level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    /// Level 6.
    #[default]
    Default,
    /// An explicit level between 0 (store) and 9 (best compression).
    Precise(u8),
}

impl Level {
    pub const NO_COMPRESSION: Level = Level::Precise(0);
    pub const BEST_SPEED: Level = Level::Precise(1);
    pub const BEST_COMPRESSION: Level = Level::Precise(9);

    /// Build a level from the conventional integer form, where `-1` means
    /// default.
    pub fn new(level: i32) -> ZipResult<Level> {
        match level {
            -1 => Ok(Level::Default),
            0..=9 => Ok(Level::Precise(level as u8)),
            _ => Err(ZipError::InvalidArgument(format!(
                "invalid compression level {level}"
            ))),
        }
    }

    pub fn value(self) -> u8 {
        match self {
            Level::Default => 6,
            Level::Precise(level) => level.min(9),
        }
    }
}

/// Match-selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Default,
    /// Ignore short matches; suited to data with small random variations.
    Filtered,
    /// Literal-only Huffman coding, no string matching.
    HuffmanOnly,
}

/// Flush behaviour for [`Deflater::deflate_with_flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    #[default]
    None,
    /// Emit all buffered input and byte-align the output with an empty
    /// stored block.
    Sync,
    /// Like `Sync`, and forget the match history so decoding can restart
    /// at this point.
    Full,
}

/// Compress `data` in one shot.
///
/// # Arguments
///
/// * `data` - Uncompressed input
/// * `level` - Compression level
/// * `zlib` - Wrap the output in a zlib header and Adler-32 trailer
pub fn compress(data: &[u8], level: Level, zlib: bool) -> ZipResult<Vec<u8>> {
    let mut deflater = Deflater::new(level, zlib);
    deflater.set_input(data)?;
    deflater.finish()?;

    let mut out = Vec::with_capacity(data.len() / 2 + 64);
    let mut buf = vec![0u8; 16 * 1024];
    while !deflater.finished() {
        let n = deflater.deflate(&mut buf)?;
        out.extend_from_slice(&buf[..n]);
    }
    deflater.end();
    Ok(out)
}

/// Decompress a complete DEFLATE or zlib stream in one shot.
///
/// # Errors
///
/// Fails with [`ZipError::InvalidData`] on corrupt input, including input
/// that ends before the stream does.
pub fn decompress(data: &[u8], zlib: bool) -> ZipResult<Vec<u8>> {
    let mut inflater = Inflater::new(zlib);
    inflater.set_input(data)?;

    let mut out = Vec::with_capacity(data.len() * 2);
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = inflater.inflate(&mut buf)?;
        out.extend_from_slice(&buf[..n]);
        if inflater.finished() {
            break;
        }
        if n == 0 {
            if inflater.needs_dictionary() {
                return Err(ZipError::IllegalState("stream requires a preset dictionary"));
            }
            return Err(ZipError::invalid_data("unexpected end of compressed stream"));
        }
    }
    inflater.end();
    Ok(out)
}
