//! Streaming DEFLATE compressor.

use log::debug;

use super::bits::BitWriter;
use super::huffman::HuffmanCodes;
use super::lz77::{Matcher, config_for};
use super::{
    CODELEN_ORDER, DIST_BASE, DIST_EXTRA, END_OF_BLOCK, FlushMode, LENGTH_BASE, LENGTH_EXTRA,
    Level, MAX_MATCH, MIN_MATCH, NUM_CODELEN_SYMBOLS, NUM_DIST_SYMBOLS, NUM_LITLEN_SYMBOLS,
    Strategy, fixed_dist_lengths, fixed_litlen_lengths,
};
use crate::checksum::{Adler32, Checksum};
use crate::error::{ZipError, ZipResult, check_range};

/// Uncompressed bytes covered by one non-final block.
const BLOCK_SIZE: usize = 64 * 1024;
/// Lookahead required before a non-final block is cut, so that matches near
/// the block end can still run to full length.
const BLOCK_TRIGGER: usize = BLOCK_SIZE + MAX_MATCH + 1;
/// Largest payload of a single stored block.
const MAX_STORED: usize = 0xFFFF;
/// Length-3 matches further back than this cost more than three literals.
const TOO_FAR: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    Finishing,
    Done,
}

#[derive(Debug, Clone, Copy)]
enum Token {
    Literal(u8),
    Match { len: u16, dist: u16 },
}

fn length_symbol(len: usize) -> usize {
    LENGTH_BASE.partition_point(|&base| base as usize <= len) - 1
}

fn dist_symbol(dist: usize) -> usize {
    DIST_BASE.partition_point(|&base| base as usize <= dist) - 1
}

/// Run-length encoded code lengths of a dynamic block header.
struct DynamicHeader {
    hlit: usize,
    hdist: usize,
    hclen: usize,
    codelen: HuffmanCodes,
    /// (symbol, extra bits value)
    rle: Vec<(u8, u8)>,
}

impl DynamicHeader {
    fn new(lit: &HuffmanCodes, dist: &HuffmanCodes) -> Self {
        let hlit = (257..=NUM_LITLEN_SYMBOLS)
            .rev()
            .find(|&n| lit.lengths[n - 1] != 0)
            .unwrap_or(257);
        let hdist = (1..=NUM_DIST_SYMBOLS)
            .rev()
            .find(|&n| dist.lengths[n - 1] != 0)
            .unwrap_or(1);

        let all: Vec<u8> = lit.lengths[..hlit]
            .iter()
            .chain(&dist.lengths[..hdist])
            .copied()
            .collect();

        let mut rle = Vec::new();
        let mut i = 0;
        while i < all.len() {
            let value = all[i];
            let mut run = all[i..].iter().take_while(|&&v| v == value).count();
            i += run;
            if value == 0 {
                while run >= 11 {
                    let n = run.min(138);
                    rle.push((18, (n - 11) as u8));
                    run -= n;
                }
                if run >= 3 {
                    rle.push((17, (run - 3) as u8));
                    run = 0;
                }
            } else {
                rle.push((value, 0));
                run -= 1;
                while run >= 3 {
                    let n = run.min(6);
                    rle.push((16, (n - 3) as u8));
                    run -= n;
                }
            }
            rle.extend(std::iter::repeat_n((value, 0), run));
        }

        let mut freqs = [0u32; NUM_CODELEN_SYMBOLS];
        for &(sym, _) in &rle {
            freqs[sym as usize] += 1;
        }
        let codelen = HuffmanCodes::from_freqs(&freqs, 7);
        let hclen = (4..=NUM_CODELEN_SYMBOLS)
            .rev()
            .find(|&n| codelen.lengths[CODELEN_ORDER[n - 1]] != 0)
            .unwrap_or(4);

        Self {
            hlit,
            hdist,
            hclen,
            codelen,
            rle,
        }
    }

    fn extra_bits(sym: u8) -> u32 {
        match sym {
            16 => 2,
            17 => 3,
            18 => 7,
            _ => 0,
        }
    }

    fn cost(&self) -> u64 {
        let body: u64 = self
            .rle
            .iter()
            .map(|&(sym, _)| {
                self.codelen.lengths[sym as usize] as u64 + Self::extra_bits(sym) as u64
            })
            .sum();
        5 + 5 + 4 + 3 * self.hclen as u64 + body
    }

    fn write(&self, w: &mut BitWriter) {
        w.write_bits((self.hlit - 257) as u32, 5);
        w.write_bits((self.hdist - 1) as u32, 5);
        w.write_bits((self.hclen - 4) as u32, 4);
        for &sym in &CODELEN_ORDER[..self.hclen] {
            w.write_bits(self.codelen.lengths[sym] as u32, 3);
        }
        for &(sym, extra) in &self.rle {
            let s = sym as usize;
            w.write_bits(self.codelen.codes[s] as u32, self.codelen.lengths[s] as u32);
            w.write_bits(extra as u32, Self::extra_bits(sym));
        }
    }
}

/// A DEFLATE compression session.
///
/// ## Lifecycle
///
/// ```text
/// new -> set_input* -> deflate* -> finish -> deflate* -> finished() -> end
/// ```
///
/// Input handed to [`set_input`](Self::set_input) replaces any input that
/// has not been consumed yet; callers normally refill only when
/// [`needs_input`](Self::needs_input) is true.
///
/// Changing the level or strategy takes effect on the next `deflate` call.
/// If input is already buffered at that point, that call encodes it with the
/// previous settings and returns 0 without copying anything out; the
/// compressed bytes are returned by the calls that follow.
pub struct Deflater {
    level: Level,
    strategy: Strategy,
    zlib: bool,
    pending_params: Option<(Level, Strategy)>,
    state: State,
    ended: bool,

    input: Vec<u8>,
    input_pos: usize,
    input_set: bool,

    matcher: Matcher,
    writer: BitWriter,
    out_pos: usize,
    fixed_lit: HuffmanCodes,
    fixed_dist: HuffmanCodes,

    header_written: bool,
    dict_id: Option<u32>,
    flushed: bool,
    adler: Adler32,
    bytes_read: u64,
    bytes_written: u64,
}

impl Deflater {
    /// Create a compressor.
    ///
    /// # Arguments
    ///
    /// * `level` - Compression level
    /// * `zlib` - Emit the zlib header and Adler-32 trailer; `false` produces
    ///   a raw DEFLATE stream as stored in ZIP entries
    pub fn new(level: Level, zlib: bool) -> Self {
        Self {
            level,
            strategy: Strategy::Default,
            zlib,
            pending_params: None,
            state: State::Ready,
            ended: false,
            input: Vec::new(),
            input_pos: 0,
            input_set: false,
            matcher: Matcher::new(),
            writer: BitWriter::default(),
            out_pos: 0,
            fixed_lit: HuffmanCodes::from_lengths(&fixed_litlen_lengths()),
            fixed_dist: HuffmanCodes::from_lengths(&fixed_dist_lengths()),
            header_written: false,
            dict_id: None,
            flushed: false,
            adler: Adler32::new(),
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    /// A raw (no zlib wrapper) compressor, as used inside ZIP entries.
    pub fn raw(level: Level) -> Self {
        Self::new(level, false)
    }

    fn ensure_open(&self) -> ZipResult<()> {
        if self.ended {
            return Err(ZipError::Closed("Deflater"));
        }
        Ok(())
    }

    fn current_params(&self) -> (Level, Strategy) {
        self.pending_params.unwrap_or((self.level, self.strategy))
    }

    pub fn set_level(&mut self, level: Level) -> ZipResult<()> {
        self.ensure_open()?;
        let (_, strategy) = self.current_params();
        self.pending_params = Some((level, strategy));
        Ok(())
    }

    pub fn set_strategy(&mut self, strategy: Strategy) -> ZipResult<()> {
        self.ensure_open()?;
        let (level, _) = self.current_params();
        self.pending_params = Some((level, strategy));
        Ok(())
    }

    pub fn level(&self) -> Level {
        self.current_params().0
    }

    pub fn strategy(&self) -> Strategy {
        self.current_params().1
    }

    /// Supply input. Replaces any input not yet consumed.
    pub fn set_input(&mut self, data: &[u8]) -> ZipResult<()> {
        self.ensure_open()?;
        if self.state != State::Ready && !data.is_empty() {
            return Err(ZipError::IllegalState("input supplied after finish()"));
        }
        self.input.clear();
        self.input.extend_from_slice(data);
        self.input_pos = 0;
        self.input_set |= !data.is_empty();
        Ok(())
    }

    /// Supply `length` bytes of `data` starting at `offset`.
    pub fn set_input_range(&mut self, data: &[u8], offset: usize, length: usize) -> ZipResult<()> {
        check_range(data.len(), offset, length)?;
        self.set_input(&data[offset..offset + length])
    }

    /// Preset the compression dictionary.
    ///
    /// Only allowed before any input was supplied (or right after
    /// [`reset`](Self::reset)). In zlib mode the dictionary's Adler-32 is
    /// announced in the stream header and the decompressor must supply the
    /// same bytes.
    pub fn set_dictionary(&mut self, dict: &[u8]) -> ZipResult<()> {
        self.ensure_open()?;
        if self.input_set || self.header_written || self.dict_id.is_some() {
            return Err(ZipError::IllegalState(
                "dictionary must be set before any input",
            ));
        }
        self.matcher.set_dictionary(dict);
        let id = Adler32::checksum(dict);
        self.dict_id = Some(id);
        debug!("deflater dictionary set: {} bytes, adler32 {id:#010x}", dict.len());
        Ok(())
    }

    pub fn set_dictionary_range(&mut self, dict: &[u8], offset: usize, length: usize) -> ZipResult<()> {
        check_range(dict.len(), offset, length)?;
        self.set_dictionary(&dict[offset..offset + length])
    }

    /// True when all supplied input has been consumed.
    pub fn needs_input(&self) -> bool {
        self.input_pos >= self.input.len()
    }

    /// Signal that no more input will follow.
    pub fn finish(&mut self) -> ZipResult<()> {
        self.ensure_open()?;
        if self.state == State::Ready {
            self.state = State::Finishing;
        }
        Ok(())
    }

    /// True once the end of the compressed stream has been returned.
    pub fn finished(&self) -> bool {
        self.state == State::Done && self.out_pos >= self.writer.out.len()
    }

    /// Compress into `out` without flushing. Returns the number of bytes
    /// written, which is 0 when more input is needed.
    pub fn deflate(&mut self, out: &mut [u8]) -> ZipResult<usize> {
        self.deflate_with_flush(out, FlushMode::None)
    }

    pub fn deflate_range(&mut self, out: &mut [u8], offset: usize, length: usize) -> ZipResult<usize> {
        check_range(out.len(), offset, length)?;
        self.deflate(&mut out[offset..offset + length])
    }

    /// Compress into `out`, flushing as requested by `flush`.
    pub fn deflate_with_flush(&mut self, out: &mut [u8], flush: FlushMode) -> ZipResult<usize> {
        self.ensure_open()?;
        if out.is_empty() {
            return Ok(0);
        }

        if let Some((level, strategy)) = self.pending_params.take() {
            let changed = level != self.level || strategy != self.strategy;
            if changed && self.matcher.lookahead() > 0 && self.state != State::Done {
                self.write_header();
                self.encode_block(false, self.matcher.lookahead());
                self.level = level;
                self.strategy = strategy;
                debug!("deflater parameters changed to {level:?}/{strategy:?} mid-stream");
                return Ok(0);
            }
            self.level = level;
            self.strategy = strategy;
        }

        let mut written = self.drain(out);
        while written < out.len() {
            self.absorb_input();

            if self.state == State::Done {
                break;
            }
            self.write_header();

            if self.matcher.lookahead() >= BLOCK_TRIGGER {
                self.encode_block(false, BLOCK_SIZE);
            } else if self.state == State::Finishing && self.needs_input() {
                self.encode_block(true, self.matcher.lookahead());
                self.writer.align();
                if self.zlib {
                    let adler = self.adler.value();
                    self.writer.write_bytes(&adler.to_be_bytes());
                }
                self.state = State::Done;
                debug!(
                    "deflater finished: {} bytes in, {} bytes out",
                    self.bytes_read,
                    self.bytes_written + written as u64 + self.pending_len() as u64
                );
            } else if flush != FlushMode::None && self.needs_input() && !self.flushed {
                if self.matcher.lookahead() > 0 {
                    self.encode_block(false, self.matcher.lookahead());
                }
                self.write_sync_marker();
                if flush == FlushMode::Full {
                    self.matcher.forget_history();
                }
                self.flushed = true;
            } else {
                break;
            }

            written += self.drain(&mut out[written..]);
        }

        self.bytes_written += written as u64;
        Ok(written)
    }

    /// Adler-32 of the uncompressed data consumed so far.
    pub fn get_adler(&self) -> u32 {
        self.adler.value()
    }

    /// Total uncompressed bytes consumed.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Total compressed bytes returned.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Unconsumed input bytes.
    pub fn remaining(&self) -> usize {
        self.input.len() - self.input_pos
    }

    /// Return to the initial state keeping level, strategy and wrapping.
    pub fn reset(&mut self) -> ZipResult<()> {
        self.ensure_open()?;
        if let Some((level, strategy)) = self.pending_params.take() {
            self.level = level;
            self.strategy = strategy;
        }
        self.state = State::Ready;
        self.input.clear();
        self.input_pos = 0;
        self.input_set = false;
        self.matcher.reset();
        self.writer.clear();
        self.out_pos = 0;
        self.header_written = false;
        self.dict_id = None;
        self.flushed = false;
        self.adler.reset();
        self.bytes_read = 0;
        self.bytes_written = 0;
        Ok(())
    }

    /// Release all buffers. Idempotent; every later call except `end`,
    /// `finished`, `needs_input` and the counters fails.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.input = Vec::new();
        self.input_pos = 0;
        self.matcher.release();
        self.writer = BitWriter::default();
        self.out_pos = 0;
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    fn pending_len(&self) -> usize {
        self.writer.out.len() - self.out_pos
    }

    fn drain(&mut self, out: &mut [u8]) -> usize {
        let n = self.pending_len().min(out.len());
        out[..n].copy_from_slice(&self.writer.out[self.out_pos..self.out_pos + n]);
        self.out_pos += n;
        if self.out_pos == self.writer.out.len() {
            self.writer.out.clear();
            self.out_pos = 0;
        }
        n
    }

    fn absorb_input(&mut self) {
        let room = BLOCK_TRIGGER.saturating_sub(self.matcher.lookahead());
        let n = room.min(self.remaining());
        if n == 0 {
            return;
        }
        let chunk = &self.input[self.input_pos..self.input_pos + n];
        self.matcher.push(chunk);
        if self.zlib {
            self.adler.update(chunk);
        }
        self.input_pos += n;
        self.bytes_read += n as u64;
        self.flushed = false;
    }

    fn write_header(&mut self) {
        if self.header_written {
            return;
        }
        self.header_written = true;
        if !self.zlib {
            return;
        }
        let level = self.level.value();
        let flevel: u8 = if self.strategy == Strategy::HuffmanOnly || level < 2 {
            0
        } else if level < 6 {
            1
        } else if level == 6 {
            2
        } else {
            3
        };
        let cmf: u8 = 0x78;
        let mut flg = flevel << 6;
        if self.dict_id.is_some() {
            flg |= 0x20;
        }
        let check = ((cmf as u16) << 8 | flg as u16) % 31;
        if check != 0 {
            flg += (31 - check) as u8;
        }
        self.writer.write_bytes(&[cmf, flg]);
        if let Some(id) = self.dict_id {
            self.writer.write_bytes(&id.to_be_bytes());
        }
    }

    fn write_sync_marker(&mut self) {
        self.writer.write_bits(0, 1);
        self.writer.write_bits(0, 2);
        self.writer.align();
        self.writer.write_bytes(&[0x00, 0x00, 0xFF, 0xFF]);
    }

    /// Encode the next `span` bytes of lookahead as one block. Matches may
    /// run past the span.
    fn encode_block(&mut self, last: bool, span: usize) {
        self.matcher.slide();
        let start = self.matcher.cursor;
        let end = start + span.min(self.matcher.lookahead());
        let level = self.level.value();

        if level == 0 {
            self.matcher.cursor = end;
            let raw = std::mem::take(&mut self.matcher.buf);
            self.write_stored(&raw[start..end], last);
            self.matcher.buf = raw;
            return;
        }

        let tokens = self.tokenize(end);
        let raw_len = self.matcher.cursor - start;

        let mut lit_freq = [0u32; NUM_LITLEN_SYMBOLS];
        let mut dist_freq = [0u32; NUM_DIST_SYMBOLS];
        let mut extra_bits = 0u64;
        for token in &tokens {
            match *token {
                Token::Literal(b) => lit_freq[b as usize] += 1,
                Token::Match { len, dist } => {
                    let ls = length_symbol(len as usize);
                    let ds = dist_symbol(dist as usize);
                    lit_freq[257 + ls] += 1;
                    dist_freq[ds] += 1;
                    extra_bits += LENGTH_EXTRA[ls] as u64 + DIST_EXTRA[ds] as u64;
                }
            }
        }
        lit_freq[END_OF_BLOCK] = 1;

        let dyn_lit = HuffmanCodes::from_freqs(&lit_freq, 15);
        let dyn_dist = HuffmanCodes::from_freqs(&dist_freq, 15);
        let header = DynamicHeader::new(&dyn_lit, &dyn_dist);

        let fixed_cost = self.fixed_lit.cost(&lit_freq) + self.fixed_dist.cost(&dist_freq) + extra_bits;
        let dynamic_cost = header.cost() + dyn_lit.cost(&lit_freq) + dyn_dist.cost(&dist_freq) + extra_bits;
        let chunks = raw_len.div_ceil(MAX_STORED).max(1) as u64;
        let stored_cost = chunks * (3 + 7 + 32) + raw_len as u64 * 8;

        if stored_cost <= fixed_cost.min(dynamic_cost) {
            let raw = std::mem::take(&mut self.matcher.buf);
            self.write_stored(&raw[start..start + raw_len], last);
            self.matcher.buf = raw;
        } else if fixed_cost <= dynamic_cost {
            self.writer.write_bits(last as u32, 1);
            self.writer.write_bits(1, 2);
            let (lit, dist) = (&self.fixed_lit, &self.fixed_dist);
            write_tokens(&mut self.writer, &tokens, lit, dist);
        } else {
            self.writer.write_bits(last as u32, 1);
            self.writer.write_bits(2, 2);
            header.write(&mut self.writer);
            write_tokens(&mut self.writer, &tokens, &dyn_lit, &dyn_dist);
        }
    }

    fn write_stored(&mut self, raw: &[u8], last: bool) {
        let mut chunks = raw.chunks(MAX_STORED).peekable();
        if chunks.peek().is_none() {
            self.write_stored_chunk(&[], last);
            return;
        }
        while let Some(chunk) = chunks.next() {
            let final_chunk = last && chunks.peek().is_none();
            self.write_stored_chunk(chunk, final_chunk);
        }
    }

    fn write_stored_chunk(&mut self, chunk: &[u8], last: bool) {
        self.writer.write_bits(last as u32, 1);
        self.writer.write_bits(0, 2);
        self.writer.align();
        let len = chunk.len() as u16;
        self.writer.write_bytes(&len.to_le_bytes());
        self.writer.write_bytes(&(!len).to_le_bytes());
        self.writer.write_bytes(chunk);
    }

    /// Turn `buf[cursor..end]` into literals and matches, advancing the
    /// cursor. The last match may extend past `end`.
    fn tokenize(&mut self, end: usize) -> Vec<Token> {
        let config = config_for(self.level.value());
        let strategy = self.strategy;
        let m = &mut self.matcher;
        let mut tokens = Vec::with_capacity(end.saturating_sub(m.cursor));

        let accept = |len: usize, dist: usize| -> bool {
            match strategy {
                Strategy::HuffmanOnly => false,
                Strategy::Filtered if len <= 5 => false,
                _ => len >= MIN_MATCH && !(len == MIN_MATCH && dist > TOO_FAR),
            }
        };

        let mut pos = m.cursor;
        while pos < end {
            m.insert_until(pos);
            let (mut len, mut dist) = if strategy == Strategy::HuffmanOnly {
                (0, 0)
            } else {
                m.find_match(pos, config.chain, config.nice)
            };
            if !accept(len, dist) {
                len = 0;
            }

            if config.lazy_matching && len >= MIN_MATCH && len < config.lazy && pos + 1 < end {
                m.insert_until(pos + 1);
                let chain = if len >= config.good {
                    config.chain >> 2
                } else {
                    config.chain
                };
                let (next_len, next_dist) = m.find_match(pos + 1, chain.max(1), config.nice);
                if accept(next_len, next_dist) && next_len > len {
                    tokens.push(Token::Literal(m.buf[pos]));
                    pos += 1;
                    len = next_len;
                    dist = next_dist;
                }
            }

            if len >= MIN_MATCH {
                tokens.push(Token::Match {
                    len: len as u16,
                    dist: dist as u16,
                });
                pos += len;
            } else {
                tokens.push(Token::Literal(m.buf[pos]));
                pos += 1;
            }
        }
        m.cursor = pos;
        m.insert_until(pos);
        tokens
    }
}

fn write_tokens(w: &mut BitWriter, tokens: &[Token], lit: &HuffmanCodes, dist: &HuffmanCodes) {
    for token in tokens {
        match *token {
            Token::Literal(b) => {
                let s = b as usize;
                w.write_bits(lit.codes[s] as u32, lit.lengths[s] as u32);
            }
            Token::Match { len, dist: d } => {
                let (len, d) = (len as usize, d as usize);
                let ls = length_symbol(len);
                let sym = 257 + ls;
                w.write_bits(lit.codes[sym] as u32, lit.lengths[sym] as u32);
                w.write_bits((len - LENGTH_BASE[ls] as usize) as u32, LENGTH_EXTRA[ls] as u32);
                let ds = dist_symbol(d);
                w.write_bits(dist.codes[ds] as u32, dist.lengths[ds] as u32);
                w.write_bits((d - DIST_BASE[ds] as usize) as u32, DIST_EXTRA[ds] as u32);
            }
        }
    }
    w.write_bits(lit.codes[END_OF_BLOCK] as u32, lit.lengths[END_OF_BLOCK] as u32);
}

impl Default for Deflater {
    fn default() -> Self {
        Self::new(Level::Default, true)
    }
}

impl std::fmt::Debug for Deflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deflater")
            .field("level", &self.level)
            .field("strategy", &self.strategy)
            .field("zlib", &self.zlib)
            .field("state", &self.state)
            .field("ended", &self.ended)
            .field("bytes_read", &self.bytes_read)
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate::decompress;

    fn run(deflater: &mut Deflater, data: &[u8], out_step: usize) -> Vec<u8> {
        deflater.set_input(data).unwrap();
        deflater.finish().unwrap();
        let mut out = Vec::new();
        let mut buf = vec![0u8; out_step];
        while !deflater.finished() {
            let n = deflater.deflate(&mut buf).unwrap();
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn symbol_lookup_tables() {
        assert_eq!(length_symbol(3), 0);
        assert_eq!(length_symbol(10), 7);
        assert_eq!(length_symbol(11), 8);
        assert_eq!(length_symbol(257), 27);
        assert_eq!(length_symbol(258), 28);
        assert_eq!(dist_symbol(1), 0);
        assert_eq!(dist_symbol(5), 4);
        assert_eq!(dist_symbol(32768), 29);
    }

    #[test]
    fn empty_input_zlib_stream() {
        let out = run(&mut Deflater::new(Level::Default, true), b"", 64);
        assert_eq!(&out[..2], &[0x78, 0x9C]);
        assert_eq!(&out[out.len() - 4..], &1u32.to_be_bytes());
        assert_eq!(decompress(&out, true).unwrap(), b"");
    }

    #[test]
    fn tiny_output_buffer() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 97) as u8 ^ (i / 1000) as u8).collect();
        let out = run(&mut Deflater::raw(Level::Default), &data, 1);
        assert_eq!(decompress(&out, false).unwrap(), data);
    }

    #[test]
    fn level_zero_stores() {
        let data = vec![7u8; 70_000];
        let out = run(&mut Deflater::raw(Level::NO_COMPRESSION), &data, 4096);
        assert!(out.len() > data.len());
        assert_eq!(decompress(&out, false).unwrap(), data);
    }

    #[test]
    fn dictionary_only_before_input() {
        let mut d = Deflater::default();
        d.set_input(b"abc").unwrap();
        assert!(matches!(d.set_dictionary(b"abc"), Err(ZipError::IllegalState(_))));
        d.reset().unwrap();
        d.set_dictionary(b"abc").unwrap();
        assert!(d.set_dictionary_range(b"abc", 2, 2).is_err());
    }

    #[test]
    fn ended_session_rejects_calls() {
        let mut d = Deflater::default();
        d.end();
        d.end();
        assert!(matches!(d.set_input(b"x"), Err(ZipError::Closed(_))));
        assert!(matches!(d.deflate(&mut [0u8; 8]), Err(ZipError::Closed(_))));
    }
}
