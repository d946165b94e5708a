use std::io::{self, Write};

use super::{DEFAULT_BUF_SIZE, Engine};
use crate::deflate::{Deflater, FlushMode, Level};
use crate::error::ZipError;

/// Compressing writer.
///
/// The compressed stream is completed by [`finish`](Self::finish) or
/// [`close`](Self::close); dropping the writer without either leaves it
/// truncated.
pub struct DeflaterWriter<'a, W: Write> {
    inner: W,
    engine: Engine<'a, Deflater>,
    buf: Vec<u8>,
    sync_flush: bool,
    finished: bool,
    closed: bool,
}

impl<W: Write> DeflaterWriter<'static, W> {
    /// zlib-wrapped output at the default level.
    pub fn new(inner: W) -> Self {
        Self::with_level(inner, Level::Default, true)
    }

    /// Output at `level`, zlib-wrapped when `zlib` is set and raw otherwise.
    pub fn with_level(inner: W, level: Level, zlib: bool) -> Self {
        Self {
            inner,
            engine: Engine::Owned(Deflater::new(level, zlib)),
            buf: vec![0u8; DEFAULT_BUF_SIZE],
            sync_flush: false,
            finished: false,
            closed: false,
        }
    }
}

impl<'a, W: Write> DeflaterWriter<'a, W> {
    /// Write through a caller-supplied deflater, staging `buf_size` bytes of
    /// output at a time. The deflater is not ended by [`close`](Self::close).
    pub fn with_deflater(inner: W, deflater: &'a mut Deflater, buf_size: usize) -> io::Result<Self> {
        if buf_size == 0 {
            return Err(ZipError::InvalidArgument("buffer size must be positive".into()).into());
        }
        Ok(Self {
            inner,
            engine: Engine::Borrowed(deflater),
            buf: vec![0u8; buf_size],
            sync_flush: false,
            finished: false,
            closed: false,
        })
    }

    /// Make [`flush`](Write::flush) emit a sync flush so that everything
    /// written so far can be decompressed by the reader.
    pub fn sync_flush(mut self, enabled: bool) -> Self {
        self.sync_flush = enabled;
        self
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(ZipError::Closed("DeflaterWriter").into());
        }
        Ok(())
    }

    fn pump(&mut self, flush: FlushMode) -> io::Result<usize> {
        let n = self.engine.deflate_with_flush(&mut self.buf, flush)?;
        if n > 0 {
            self.inner.write_all(&self.buf[..n])?;
        }
        Ok(n)
    }

    /// Complete the compressed stream without closing the sink. Further
    /// writes fail.
    pub fn finish(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        if self.finished {
            return Ok(());
        }
        self.engine.finish()?;
        while !self.engine.finished() {
            self.pump(FlushMode::None)?;
        }
        self.finished = true;
        Ok(())
    }

    /// Finish the stream and flush the sink. Ends the deflater only if this
    /// writer created it. Calling `close` again has no effect.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.finish()?;
        self.inner.flush()?;
        self.closed = true;
        if self.engine.is_owned() {
            self.engine.end();
        }
        Ok(())
    }

    pub fn deflater(&self) -> &Deflater {
        &self.engine
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Finish the stream and return the sink.
    pub fn into_inner(mut self) -> io::Result<W> {
        if !self.closed {
            self.finish()?;
        }
        Ok(self.inner)
    }
}

impl<W: Write> Write for DeflaterWriter<'_, W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        if self.finished {
            return Err(ZipError::IllegalState("write after finish").into());
        }
        if data.is_empty() {
            return Ok(0);
        }
        self.engine.set_input(data)?;
        while !self.engine.needs_input() {
            self.pump(FlushMode::None)?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        if self.sync_flush && !self.finished {
            while self.pump(FlushMode::Sync)? == self.buf.len() {}
        }
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate::decompress;

    #[test]
    fn writes_zlib_stream() {
        let mut w = DeflaterWriter::new(Vec::new());
        for _ in 0..100 {
            w.write_all(b"streaming data, ").unwrap();
        }
        let packed = w.into_inner().unwrap();
        assert_eq!(decompress(&packed, true).unwrap(), b"streaming data, ".repeat(100));
    }

    #[test]
    fn sync_flush_makes_prefix_decodable() {
        let mut w = DeflaterWriter::with_level(Vec::new(), Level::Default, false).sync_flush(true);
        w.write_all(b"first half ").unwrap();
        w.flush().unwrap();
        let flushed = w.get_ref().clone();
        assert_eq!(&flushed[flushed.len() - 4..], &[0x00, 0x00, 0xFF, 0xFF]);

        let mut inflater = crate::deflate::Inflater::raw();
        inflater.set_input(&flushed).unwrap();
        let mut out = [0u8; 64];
        let n = inflater.inflate(&mut out).unwrap();
        assert_eq!(&out[..n], b"first half ");
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let mut w = DeflaterWriter::new(Vec::new());
        w.write_all(b"x").unwrap();
        w.close().unwrap();
        w.close().unwrap();
        assert!(w.write(b"y").is_err());
        assert!(w.deflater().is_ended());
    }

    #[test]
    fn borrowed_engine_is_not_ended() {
        let mut deflater = Deflater::raw(Level::BEST_SPEED);
        let mut sink = Vec::new();
        {
            let mut w = DeflaterWriter::with_deflater(&mut sink, &mut deflater, 16).unwrap();
            w.write_all(&[b'z'; 1000]).unwrap();
            w.close().unwrap();
        }
        assert!(!deflater.is_ended());
        assert_eq!(deflater.bytes_read(), 1000);
        assert_eq!(decompress(&sink, false).unwrap(), vec![b'z'; 1000]);
    }
}
