use std::io::{self, Read};

use log::trace;

use super::{DEFAULT_BUF_SIZE, Engine};
use crate::deflate::Inflater;
use crate::error::ZipError;

/// Decompressing reader.
///
/// # Example
///
/// ```
/// use std::io::Read;
/// use zipcodec::deflate::{compress, Level};
/// use zipcodec::stream::InflaterReader;
///
/// let packed = compress(b"hello hello hello", Level::Default, true).unwrap();
/// let mut text = String::new();
/// InflaterReader::new(&packed[..]).read_to_string(&mut text).unwrap();
/// assert_eq!(text, "hello hello hello");
/// ```
pub struct InflaterReader<'a, R> {
    inner: R,
    engine: Engine<'a, Inflater>,
    buf: Vec<u8>,
    eof: bool,
    closed: bool,
}

impl<R: Read> InflaterReader<'static, R> {
    /// Read a zlib-wrapped stream.
    pub fn new(inner: R) -> Self {
        Self::owned(inner, Inflater::new(true))
    }

    /// Read a raw DEFLATE stream.
    pub fn raw(inner: R) -> Self {
        Self::owned(inner, Inflater::raw())
    }

    fn owned(inner: R, inflater: Inflater) -> Self {
        Self {
            inner,
            engine: Engine::Owned(inflater),
            buf: vec![0u8; DEFAULT_BUF_SIZE],
            eof: false,
            closed: false,
        }
    }
}

impl<'a, R: Read> InflaterReader<'a, R> {
    /// Read through a caller-supplied inflater, pulling `buf_size` bytes
    /// from `inner` at a time. The inflater is not ended by
    /// [`close`](Self::close).
    pub fn with_inflater(inner: R, inflater: &'a mut Inflater, buf_size: usize) -> io::Result<Self> {
        if buf_size == 0 {
            return Err(ZipError::InvalidArgument("buffer size must be positive".into()).into());
        }
        Ok(Self {
            inner,
            engine: Engine::Borrowed(inflater),
            buf: vec![0u8; buf_size],
            eof: false,
            closed: false,
        })
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(ZipError::Closed("InflaterReader").into());
        }
        Ok(())
    }

    /// 1 while more output may follow, 0 once the end of the stream has
    /// been returned by a read.
    pub fn available(&self) -> io::Result<usize> {
        self.ensure_open()?;
        Ok(if self.eof { 0 } else { 1 })
    }

    /// Skip up to `n` decompressed bytes, returning how many were skipped.
    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        self.ensure_open()?;
        let mut scratch = [0u8; 512];
        let mut skipped = 0u64;
        while skipped < n {
            let want = (n - skipped).min(scratch.len() as u64) as usize;
            let got = self.read(&mut scratch[..want])?;
            if got == 0 {
                break;
            }
            skipped += got as u64;
        }
        Ok(skipped)
    }

    /// Close the reader. Ends the inflater only if this reader created it.
    /// Calling `close` again has no effect.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.engine.is_owned() {
            self.engine.end();
        }
    }

    pub fn inflater(&self) -> &Inflater {
        &self.engine
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for InflaterReader<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.engine.inflate(out)?;
            if n > 0 {
                return Ok(n);
            }
            if self.engine.finished() {
                self.eof = true;
                return Ok(0);
            }
            if self.engine.needs_dictionary() {
                return Err(ZipError::IllegalState("stream requires a preset dictionary").into());
            }
            if !self.engine.needs_input() {
                return Err(ZipError::invalid_data("decompressor made no progress").into());
            }
            let got = self.inner.read(&mut self.buf)?;
            if got == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of compressed stream",
                ));
            }
            trace!("inflater reader pulled {got} bytes");
            self.engine.set_input(&self.buf[..got])?;
        }
    }
}
