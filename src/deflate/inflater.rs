//! Streaming DEFLATE decompressor.
//!
//! Decoding is organised in small atomic steps (one header, one symbol, one
//! run of stored bytes). Each step works on a [`BitReader`] created from the
//! last committed [`BitCursor`]; if the input runs out halfway, the reader is
//! simply dropped and the step is retried once more input has been supplied.

use std::mem;

use log::{debug, trace};

use super::bits::{BitCursor, BitReader};
use super::huffman::HuffmanDecoder;
use super::{
    CODELEN_ORDER, DIST_BASE, DIST_EXTRA, END_OF_BLOCK, LENGTH_BASE, LENGTH_EXTRA,
    NUM_CODELEN_SYMBOLS, NUM_DIST_SYMBOLS, NUM_LITLEN_SYMBOLS, WINDOW_SIZE, fixed_dist_lengths,
    fixed_litlen_lengths,
};
use crate::checksum::{Adler32, Checksum};
use crate::error::{ZipError, ZipResult, check_range};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Dictionary,
    BlockHeader,
    Stored { remaining: usize },
    Huffman,
    Trailer,
    Done,
}

enum Progress {
    /// The step completed; commit the cursor and keep going.
    Continue,
    /// Not enough input for the step; roll back.
    Stall,
    /// Nothing more can be decoded until the caller acts.
    Halt,
}

/// Unwrap a bit read, stalling the step when input runs out.
macro_rules! need {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => return Ok(Progress::Stall),
        }
    };
}

/// A DEFLATE decompression session.
///
/// Input is buffered internally until it has been fully decoded, so the
/// caller may hand over arbitrarily small pieces; output is produced into
/// buffers of any size.
pub struct Inflater {
    zlib: bool,
    state: State,
    last_block: bool,
    ended: bool,
    failure: Option<String>,

    input: Vec<u8>,
    cursor: BitCursor,
    /// Bytes of `input` retained from earlier `set_input` calls.
    carry: usize,
    stalled: bool,

    /// Decoded output, preceded by at least one window of history.
    window: Vec<u8>,
    /// Bytes of `window` already handed to the caller.
    flushed: usize,
    /// Bytes of `window` already folded into `adler`.
    adler_mark: usize,

    lit: HuffmanDecoder,
    dist: HuffmanDecoder,

    adler: Adler32,
    dict_id: u32,
    total_fed: u64,
    bytes_written: u64,
}

impl Inflater {
    /// Create a decompressor.
    ///
    /// # Arguments
    ///
    /// * `zlib` - Expect a zlib header and Adler-32 trailer; `false` decodes
    ///   a raw DEFLATE stream
    pub fn new(zlib: bool) -> Self {
        Self {
            zlib,
            state: if zlib { State::Header } else { State::BlockHeader },
            last_block: false,
            ended: false,
            failure: None,
            input: Vec::new(),
            cursor: BitCursor::default(),
            carry: 0,
            stalled: true,
            window: Vec::new(),
            flushed: 0,
            adler_mark: 0,
            lit: fixed_lit_decoder(),
            dist: fixed_dist_decoder(),
            adler: Adler32::new(),
            dict_id: 0,
            total_fed: 0,
            bytes_written: 0,
        }
    }

    /// A raw decompressor, as used for ZIP entries.
    pub fn raw() -> Self {
        Self::new(false)
    }

    fn ensure_open(&self) -> ZipResult<()> {
        if self.ended {
            return Err(ZipError::Closed("Inflater"));
        }
        Ok(())
    }

    /// Append compressed input.
    pub fn set_input(&mut self, data: &[u8]) -> ZipResult<()> {
        self.ensure_open()?;
        let consumed = self.cursor.pos;
        self.input.drain(..consumed);
        self.cursor.rebase(consumed);
        self.carry = self.input.len();
        self.input.extend_from_slice(data);
        self.total_fed += data.len() as u64;
        if !data.is_empty() {
            self.stalled = false;
        }
        Ok(())
    }

    pub fn set_input_range(&mut self, data: &[u8], offset: usize, length: usize) -> ZipResult<()> {
        check_range(data.len(), offset, length)?;
        self.set_input(&data[offset..offset + length])
    }

    /// Supply the preset dictionary.
    ///
    /// For zlib streams this is only valid while
    /// [`needs_dictionary`](Self::needs_dictionary) is true, and the
    /// dictionary's Adler-32 must match the one announced by the stream.
    /// Raw streams accept a dictionary before decoding starts.
    pub fn set_dictionary(&mut self, dict: &[u8]) -> ZipResult<()> {
        self.ensure_open()?;
        if self.zlib {
            if self.state != State::Dictionary {
                return Err(ZipError::IllegalState("stream does not expect a dictionary"));
            }
            let actual = Adler32::checksum(dict);
            if actual != self.dict_id {
                return Err(ZipError::DictionaryMismatch {
                    expected: self.dict_id,
                    actual,
                });
            }
        } else if self.state != State::BlockHeader || self.cursor.pos > 0 || !self.window.is_empty()
        {
            return Err(ZipError::IllegalState(
                "dictionary must be set before decoding starts",
            ));
        }

        let dict = &dict[dict.len().saturating_sub(WINDOW_SIZE)..];
        self.window.extend_from_slice(dict);
        self.flushed = self.window.len();
        self.adler_mark = self.window.len();
        self.adler.reset();
        self.state = State::BlockHeader;
        debug!("inflater dictionary accepted: {} bytes", dict.len());
        Ok(())
    }

    pub fn set_dictionary_range(&mut self, dict: &[u8], offset: usize, length: usize) -> ZipResult<()> {
        check_range(dict.len(), offset, length)?;
        self.set_dictionary(&dict[offset..offset + length])
    }

    /// True when decoding is blocked until more input is supplied.
    pub fn needs_input(&self) -> bool {
        self.stalled && self.state != State::Done
    }

    /// True when the stream announced a preset dictionary that has not been
    /// supplied yet.
    pub fn needs_dictionary(&self) -> bool {
        self.state == State::Dictionary
    }

    /// True once the end of the stream was decoded and all output returned.
    pub fn finished(&self) -> bool {
        self.state == State::Done && self.flushed == self.window.len()
    }

    /// Decompress into `out`, returning the number of bytes produced.
    ///
    /// A return value of 0 means more input or a dictionary is needed, or
    /// the stream has finished.
    ///
    /// # Errors
    ///
    /// [`ZipError::InvalidData`] on a corrupt stream. Output decoded before
    /// the corruption is returned first; the error is reported by the call
    /// that has nothing left to return.
    pub fn inflate(&mut self, out: &mut [u8]) -> ZipResult<usize> {
        self.ensure_open()?;
        if out.is_empty() {
            return Ok(0);
        }
        self.compact();

        let mut n = self.drain(out);
        if n < out.len() && self.failure.is_none() {
            if let Err(e) = self.decode(out.len() - n) {
                debug!("inflater failed: {e}");
                self.failure = Some(match e {
                    ZipError::InvalidData(reason) => reason,
                    other => other.to_string(),
                });
            }
            n += self.drain(&mut out[n..]);
        }

        if n == 0 {
            if let Some(reason) = &self.failure {
                return Err(ZipError::InvalidData(reason.clone()));
            }
        }
        self.sync_adler();
        self.bytes_written += n as u64;
        Ok(n)
    }

    pub fn inflate_range(&mut self, out: &mut [u8], offset: usize, length: usize) -> ZipResult<usize> {
        check_range(out.len(), offset, length)?;
        self.inflate(&mut out[offset..offset + length])
    }

    /// Adler-32 of the output so far, or the announced dictionary checksum
    /// while [`needs_dictionary`](Self::needs_dictionary) is true.
    pub fn get_adler(&self) -> u32 {
        if self.state == State::Dictionary {
            self.dict_id
        } else {
            self.adler.value()
        }
    }

    /// Bytes of the most recent input that were not consumed. After the end
    /// of the stream these are the bytes that follow it.
    pub fn remaining(&self) -> usize {
        if self.needs_input() {
            return 0;
        }
        let mut unread = self.input.len() - self.cursor.pos.min(self.input.len());
        if self.state == State::Done {
            unread += self.cursor.buffered_bytes();
        }
        unread.min(self.input.len() - self.carry)
    }

    /// Total compressed bytes consumed.
    pub fn bytes_read(&self) -> u64 {
        self.total_fed - self.remaining() as u64
    }

    /// Total uncompressed bytes returned.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Return to the initial state, keeping the wrapping mode.
    pub fn reset(&mut self) -> ZipResult<()> {
        self.ensure_open()?;
        *self = Self::new(self.zlib);
        Ok(())
    }

    /// Release all buffers. Idempotent.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.input = Vec::new();
        self.window = Vec::new();
        self.cursor = BitCursor::default();
        self.carry = 0;
        self.flushed = 0;
        self.adler_mark = 0;
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    fn drain(&mut self, out: &mut [u8]) -> usize {
        let n = (self.window.len() - self.flushed).min(out.len());
        out[..n].copy_from_slice(&self.window[self.flushed..self.flushed + n]);
        self.flushed += n;
        n
    }

    fn sync_adler(&mut self) {
        if self.adler_mark < self.window.len() {
            self.adler.update(&self.window[self.adler_mark..]);
            self.adler_mark = self.window.len();
        }
    }

    /// Discard history that is no longer reachable by any distance.
    fn compact(&mut self) {
        if self.flushed <= 2 * WINDOW_SIZE {
            return;
        }
        self.sync_adler();
        let shift = self.flushed - WINDOW_SIZE;
        self.window.drain(..shift);
        self.flushed -= shift;
        self.adler_mark -= shift;
    }

    /// Decode until `want` bytes of output are pending, the input runs out
    /// or the stream halts.
    fn decode(&mut self, want: usize) -> ZipResult<()> {
        let input = mem::take(&mut self.input);
        let result = self.run(&input, want);
        self.input = input;
        result
    }

    fn run(&mut self, input: &[u8], want: usize) -> ZipResult<()> {
        while self.window.len() - self.flushed < want {
            let mut reader = BitReader::new(input, self.cursor);
            match self.step(&mut reader)? {
                Progress::Continue => self.cursor = reader.cursor(),
                Progress::Stall => {
                    self.stalled = true;
                    self.carry = input.len();
                    return Ok(());
                }
                Progress::Halt => {
                    self.cursor = reader.cursor();
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn step(&mut self, r: &mut BitReader<'_>) -> ZipResult<Progress> {
        match self.state {
            State::Header => self.read_zlib_header(r),
            State::Dictionary | State::Done => Ok(Progress::Halt),
            State::BlockHeader => self.read_block_header(r),
            State::Stored { remaining } => {
                if remaining == 0 {
                    self.end_block();
                    return Ok(Progress::Continue);
                }
                if r.has_buffered_byte() {
                    let byte = need!(r.bits(8));
                    self.window.push(byte as u8);
                    self.state = State::Stored {
                        remaining: remaining - 1,
                    };
                    return Ok(Progress::Continue);
                }
                let chunk = r.take_bytes(remaining.min(WINDOW_SIZE));
                if chunk.is_empty() {
                    return Ok(Progress::Stall);
                }
                self.window.extend_from_slice(chunk);
                self.state = State::Stored {
                    remaining: remaining - chunk.len(),
                };
                Ok(Progress::Continue)
            }
            State::Huffman => self.read_symbol(r),
            State::Trailer => {
                r.align();
                let mut expected = 0u32;
                for _ in 0..4 {
                    expected = (expected << 8) | need!(r.bits(8));
                }
                self.sync_adler();
                if expected != self.adler.value() {
                    return Err(ZipError::invalid_data("incorrect data check"));
                }
                self.state = State::Done;
                debug!("zlib stream verified, adler32 {expected:#010x}");
                Ok(Progress::Continue)
            }
        }
    }

    fn read_zlib_header(&mut self, r: &mut BitReader<'_>) -> ZipResult<Progress> {
        let cmf = need!(r.bits(8));
        let flg = need!(r.bits(8));
        if cmf & 0x0F != 8 {
            return Err(ZipError::invalid_data("unknown compression method"));
        }
        if cmf >> 4 > 7 {
            return Err(ZipError::invalid_data("invalid window size"));
        }
        if ((cmf << 8) | flg) % 31 != 0 {
            return Err(ZipError::invalid_data("incorrect header check"));
        }
        if flg & 0x20 != 0 {
            let mut id = 0u32;
            for _ in 0..4 {
                id = (id << 8) | need!(r.bits(8));
            }
            self.dict_id = id;
            self.state = State::Dictionary;
            debug!("zlib stream requires dictionary {id:#010x}");
            return Ok(Progress::Halt);
        }
        self.state = State::BlockHeader;
        Ok(Progress::Continue)
    }

    fn read_block_header(&mut self, r: &mut BitReader<'_>) -> ZipResult<Progress> {
        let last = need!(r.bits(1)) == 1;
        let kind = need!(r.bits(2));
        match kind {
            0 => {
                r.align();
                let len = need!(r.bits(16));
                let nlen = need!(r.bits(16));
                if len != !nlen & 0xFFFF {
                    return Err(ZipError::invalid_data("invalid stored block lengths"));
                }
                trace!("stored block, {len} bytes");
                self.state = State::Stored {
                    remaining: len as usize,
                };
            }
            1 => {
                trace!("fixed Huffman block");
                self.lit = fixed_lit_decoder();
                self.dist = fixed_dist_decoder();
                self.state = State::Huffman;
            }
            2 => {
                if let Progress::Stall = self.read_dynamic_tables(r)? {
                    return Ok(Progress::Stall);
                }
                trace!("dynamic Huffman block");
                self.state = State::Huffman;
            }
            _ => return Err(ZipError::invalid_data("invalid block type")),
        }
        self.last_block = last;
        Ok(Progress::Continue)
    }

    fn read_dynamic_tables(&mut self, r: &mut BitReader<'_>) -> ZipResult<Progress> {
        let hlit = need!(r.bits(5)) as usize + 257;
        let hdist = need!(r.bits(5)) as usize + 1;
        let hclen = need!(r.bits(4)) as usize + 4;
        if hlit > NUM_LITLEN_SYMBOLS || hdist > NUM_DIST_SYMBOLS {
            return Err(ZipError::invalid_data(
                "too many length or distance symbols",
            ));
        }

        let mut cl_lengths = [0u8; NUM_CODELEN_SYMBOLS];
        for &sym in &CODELEN_ORDER[..hclen] {
            cl_lengths[sym] = need!(r.bits(3)) as u8;
        }
        let cl = HuffmanDecoder::new(&cl_lengths)
            .map_err(|_| ZipError::invalid_data("invalid code lengths set"))?;

        let total = hlit + hdist;
        let mut lengths = Vec::with_capacity(total);
        while lengths.len() < total {
            let sym = need!(cl.decode(r)?);
            let (value, repeat) = match sym {
                0..=15 => (sym as u8, 1),
                16 => {
                    let Some(&prev) = lengths.last() else {
                        return Err(ZipError::invalid_data("invalid bit length repeat"));
                    };
                    (prev, 3 + need!(r.bits(2)) as usize)
                }
                17 => (0, 3 + need!(r.bits(3)) as usize),
                _ => (0, 11 + need!(r.bits(7)) as usize),
            };
            if lengths.len() + repeat > total {
                return Err(ZipError::invalid_data("invalid bit length repeat"));
            }
            lengths.extend(std::iter::repeat_n(value, repeat));
        }

        if lengths[END_OF_BLOCK] == 0 {
            return Err(ZipError::invalid_data("invalid code -- missing end-of-block"));
        }
        self.lit = HuffmanDecoder::new(&lengths[..hlit])
            .map_err(|_| ZipError::invalid_data("invalid literal/lengths set"))?;
        self.dist = HuffmanDecoder::new(&lengths[hlit..])
            .map_err(|_| ZipError::invalid_data("invalid distances set"))?;
        Ok(Progress::Continue)
    }

    fn read_symbol(&mut self, r: &mut BitReader<'_>) -> ZipResult<Progress> {
        let sym = need!(self.lit.decode(r)?) as usize;
        if sym < END_OF_BLOCK {
            self.window.push(sym as u8);
            return Ok(Progress::Continue);
        }
        if sym == END_OF_BLOCK {
            self.end_block();
            return Ok(Progress::Continue);
        }

        let index = sym - 257;
        if index >= LENGTH_BASE.len() {
            return Err(ZipError::invalid_data("invalid literal/length code"));
        }
        let len = LENGTH_BASE[index] as usize + need!(r.bits(LENGTH_EXTRA[index] as u32)) as usize;

        let dsym = need!(self.dist.decode(r)?) as usize;
        if dsym >= NUM_DIST_SYMBOLS {
            return Err(ZipError::invalid_data("invalid distance code"));
        }
        let dist = DIST_BASE[dsym] as usize + need!(r.bits(DIST_EXTRA[dsym] as u32)) as usize;
        if dist > self.window.len() {
            return Err(ZipError::invalid_data("invalid distance too far back"));
        }

        let start = self.window.len() - dist;
        if dist >= len {
            self.window.extend_from_within(start..start + len);
        } else {
            for i in 0..len {
                let byte = self.window[start + i];
                self.window.push(byte);
            }
        }
        Ok(Progress::Continue)
    }

    fn end_block(&mut self) {
        self.state = if !self.last_block {
            State::BlockHeader
        } else if self.zlib {
            State::Trailer
        } else {
            State::Done
        };
    }
}

fn fixed_lit_decoder() -> HuffmanDecoder {
    // The fixed code is complete, so construction cannot fail.
    HuffmanDecoder::new(&fixed_litlen_lengths()).unwrap_or_else(|_| unreachable!())
}

fn fixed_dist_decoder() -> HuffmanDecoder {
    HuffmanDecoder::new(&fixed_dist_lengths()).unwrap_or_else(|_| unreachable!())
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflater")
            .field("zlib", &self.zlib)
            .field("state", &self.state)
            .field("ended", &self.ended)
            .field("bytes_read", &self.bytes_read())
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate::{Deflater, Level, compress};

    fn inflate_all(inflater: &mut Inflater, out_step: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; out_step];
        loop {
            let n = inflater.inflate(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn fixed_block_literal_stream() {
        // "a" compressed with a fixed Huffman block.
        let raw = [0x4B, 0x04, 0x00];
        let mut inf = Inflater::raw();
        inf.set_input(&raw).unwrap();
        assert_eq!(inflate_all(&mut inf, 16), b"a");
        assert!(inf.finished());
        assert_eq!(inf.remaining(), 0);
    }

    #[test]
    fn byte_at_a_time_input() {
        let data = b"Welcome to the US Open; ".repeat(300);
        let packed = compress(&data, Level::Default, true).unwrap();

        let mut inf = Inflater::new(true);
        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        for byte in &packed {
            inf.set_input(std::slice::from_ref(byte)).unwrap();
            loop {
                let n = inf.inflate(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
        }
        assert!(inf.finished());
        assert_eq!(out, data);
        assert_eq!(inf.bytes_read(), packed.len() as u64);
        assert_eq!(inf.bytes_written(), data.len() as u64);
        assert_eq!(inf.get_adler(), Adler32::checksum(&data));
    }

    #[test]
    fn preset_dictionary() {
        let data = b"Welcome to the US Open;".repeat(6);
        let mut def = Deflater::new(Level::Default, true);
        def.set_dictionary(b"pen").unwrap();
        def.set_input(&data).unwrap();
        def.finish().unwrap();
        let mut packed = vec![0u8; 512];
        let mut len = 0;
        while !def.finished() {
            len += def.deflate(&mut packed[len..]).unwrap();
        }
        packed.truncate(len);

        let mut inf = Inflater::new(true);
        inf.set_input(&packed).unwrap();
        let mut buf = [0u8; 256];
        assert_eq!(inf.inflate(&mut buf).unwrap(), 0);
        assert!(inf.needs_dictionary());
        assert_eq!(inf.get_adler(), Adler32::checksum(b"pen"));

        let err = inf.set_dictionary(b"pan").unwrap_err();
        assert!(matches!(err, ZipError::DictionaryMismatch { .. }));
        inf.set_dictionary_range(b"open", 1, 3).unwrap();

        assert_eq!(inflate_all(&mut inf, 256), data);
        assert!(inf.finished());
    }

    #[test]
    fn trailing_bytes_are_left_over() {
        let mut packed = compress(b"payload payload payload", Level::Default, false).unwrap();
        packed.extend_from_slice(b"NEXT");
        let mut inf = Inflater::raw();
        inf.set_input(&packed).unwrap();
        assert_eq!(inflate_all(&mut inf, 64), b"payload payload payload");
        assert_eq!(inf.remaining(), 4);
    }

    #[test]
    fn corrupt_streams_fail() {
        let mut inf = Inflater::raw();
        inf.set_input(&[0x07]).unwrap();
        assert!(matches!(inf.inflate(&mut [0u8; 8]), Err(ZipError::InvalidData(_))));

        let mut inf = Inflater::new(true);
        inf.set_input(&[0x78, 0x9D]).unwrap();
        assert!(inf.inflate(&mut [0u8; 8]).is_err());

        let mut packed = compress(b"checked", Level::Default, true).unwrap();
        let last = packed.len() - 1;
        packed[last] ^= 0xFF;
        let mut inf = Inflater::new(true);
        inf.set_input(&packed).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(inf.inflate(&mut buf).unwrap(), 7);
        let err = inf.inflate(&mut buf).unwrap_err();
        assert!(err.to_string().contains("incorrect data check"));
    }

    #[test]
    fn raw_dictionary_only_at_start() {
        let mut inf = Inflater::raw();
        inf.set_dictionary(b"abc").unwrap();
        assert!(inf.set_dictionary(b"abc").is_err());
        let mut zlib = Inflater::new(true);
        assert!(matches!(zlib.set_dictionary(b"x"), Err(ZipError::IllegalState(_))));
    }

    #[test]
    fn end_is_idempotent() {
        let mut inf = Inflater::default();
        inf.end();
        inf.end();
        assert!(matches!(inf.set_input(b"x"), Err(ZipError::Closed(_))));
    }
}
