//! Forward-only reader that walks local headers without the central
//! directory.

use byteorder::{LittleEndian, ReadBytesExt};
use encoding_rs::{Encoding, UTF_8};
use log::{debug, trace};
use std::io::{self, Read};

use super::encoding::decode;
use super::entry::{DosDateTime, ZipEntry};
use super::structures::*;
use crate::checksum::{Checksum, Crc32};
use crate::deflate::Inflater;
use crate::error::{ZipError, ZipResult};

const BUF_SIZE: usize = 16 * 1024;

/// Buffered source that can give back the bytes an inflater did not use.
struct Pushback<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    len: usize,
}

impl<R: Read> Pushback<R> {
    /// Refill when empty; returns the number of buffered bytes, 0 at end
    /// of input.
    fn fill(&mut self) -> io::Result<usize> {
        if self.pos == self.len {
            self.pos = 0;
            self.len = 0;
            self.len = loop {
                match self.inner.read(&mut self.buf) {
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    other => break other?,
                }
            };
        }
        Ok(self.len - self.pos)
    }

    fn buffered(&self) -> &[u8] {
        &self.buf[self.pos..self.len]
    }

    fn consume_all(&mut self) {
        self.pos = self.len;
    }

    /// Hand back the last `n` consumed bytes.
    fn unread(&mut self, n: usize) {
        self.pos -= n.min(self.pos);
    }
}

impl<R: Read> Read for Pushback<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = self.fill()?.min(out.len());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// State of the entry whose data is being read.
struct Current {
    entry: ZipEntry,
    inflater: Option<Inflater>,
    /// Stored bytes not yet read.
    remaining: u64,
    descriptor: bool,
    zip64_extra: bool,
    crc: Crc32,
    produced: u64,
    done: bool,
    /// Verification failure, reported again by every later read.
    failure: Option<ZipError>,
}

impl Current {
    fn read<R: Read>(&mut self, src: &mut Pushback<R>, out: &mut [u8]) -> io::Result<usize> {
        if let Some(err) = &self.failure {
            return Err(err.replay().into());
        }
        if self.done || out.is_empty() {
            return Ok(0);
        }
        let n = match self.inflater.as_mut() {
            None => {
                let want = (out.len() as u64).min(self.remaining) as usize;
                let n = src.read(&mut out[..want])?;
                if n == 0 && want > 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("archive ends inside the data of {}", self.entry.name()),
                    ));
                }
                self.remaining -= n as u64;
                n
            }
            Some(inflater) => inflate_from(inflater, src, out, self.entry.name())?,
        };
        if n == 0 {
            self.done = true;
            if let Err(err) = self.finish(src) {
                self.failure = Some(err.replay());
                return Err(err.into());
            }
            return Ok(0);
        }
        self.crc.update(&out[..n]);
        self.produced += n as u64;
        Ok(n)
    }

    /// Read the data descriptor if there is one, then check the observed
    /// values against the recorded ones.
    fn finish<R: Read>(&mut self, src: &mut Pushback<R>) -> ZipResult<()> {
        let crc = self.crc.value();
        let consumed = match &self.inflater {
            Some(inflater) => inflater.bytes_read(),
            None => self.entry.compressed_size().unwrap_or(0),
        };

        if self.descriptor {
            let mut value = src.read_u32::<LittleEndian>()?;
            let signed = value == DataDescriptor::SIGNATURE;
            if signed {
                value = src.read_u32::<LittleEndian>()?;
            }
            let wide = self.zip64_extra || self.produced >= ZIP64_LIMIT || consumed >= ZIP64_LIMIT;
            let (csize, size) = if wide {
                (src.read_u64::<LittleEndian>()?, src.read_u64::<LittleEndian>()?)
            } else {
                (
                    src.read_u32::<LittleEndian>()? as u64,
                    src.read_u32::<LittleEndian>()? as u64,
                )
            };
            trace!(
                "{} data descriptor ({}{}): crc {value:#010x}, {csize}/{size} bytes",
                self.entry.name(),
                if signed { "signed" } else { "unsigned" },
                if wide { ", 8-byte sizes" } else { "" }
            );
            self.entry.set_crc(value);
            self.entry.set_compressed_size(csize);
            self.entry.set_size(size);
        }

        let name = self.entry.name().to_string();
        let expected = self.entry.crc().unwrap_or(0);
        if expected != crc {
            return Err(ZipError::CrcMismatch {
                name,
                expected,
                actual: crc,
            });
        }
        for (what, expected, actual) in [
            ("size", self.entry.size(), self.produced),
            ("compressed size", self.entry.compressed_size(), consumed),
        ] {
            let expected = expected.unwrap_or(0);
            if expected != actual {
                return Err(ZipError::SizeMismatch {
                    name,
                    what,
                    expected,
                    actual,
                });
            }
        }
        debug!("entry {} read: {} bytes", self.entry.name(), self.produced);
        Ok(())
    }
}

fn inflate_from<R: Read>(
    inflater: &mut Inflater,
    src: &mut Pushback<R>,
    out: &mut [u8],
    name: &str,
) -> io::Result<usize> {
    loop {
        let n = inflater.inflate(out)?;
        if n > 0 {
            return Ok(n);
        }
        if inflater.finished() {
            src.unread(inflater.remaining());
            return Ok(0);
        }
        if !inflater.needs_input() {
            return Err(ZipError::invalid_data("decompressor made no progress").into());
        }
        if src.fill()? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("archive ends inside the compressed data of {name}"),
            ));
        }
        inflater.set_input(src.buffered())?;
        src.consume_all();
    }
}

/// Reads an archive front to back from a plain byte stream.
///
/// Each [`next_entry`](Self::next_entry) call positions the reader at the
/// data of the next entry, which is then read through [`Read`]. The end of
/// an entry's data is reported as end of file. For entries written with a
/// data descriptor, the size and CRC in [`entry`](Self::entry) are filled
/// in once that point is reached.
///
/// STORED entries with a data descriptor cannot be delimited without the
/// central directory and are rejected.
///
/// A size or CRC mismatch is sticky: every later read of that entry, and
/// every later `next_entry` call, fails with the same error.
pub struct ZipReader<R: Read> {
    src: Pushback<R>,
    encoding: &'static Encoding,
    current: Option<Current>,
    at_end: bool,
}

impl<R: Read> ZipReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_encoding(inner, UTF_8)
    }

    /// Decode names without flag bit 11 with `encoding`.
    pub fn with_encoding(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            src: Pushback {
                inner,
                buf: vec![0u8; BUF_SIZE],
                pos: 0,
                len: 0,
            },
            encoding,
            current: None,
            at_end: false,
        }
    }

    /// The entry most recently returned by `next_entry`.
    pub fn entry(&self) -> Option<&ZipEntry> {
        self.current.as_ref().map(|c| &c.entry)
    }

    /// Skip the rest of the current entry, verifying it.
    pub fn close_entry(&mut self) -> ZipResult<()> {
        if let Some(current) = self.current.as_mut() {
            let mut scratch = [0u8; 4096];
            while current.read(&mut self.src, &mut scratch)? > 0 {}
        }
        Ok(())
    }

    /// Advance to the next entry. Returns `None` once the central directory
    /// (or the end of the input) is reached.
    pub fn next_entry(&mut self) -> ZipResult<Option<ZipEntry>> {
        self.close_entry()?;
        self.current = None;
        if self.at_end {
            return Ok(None);
        }

        let mut fixed = [0u8; LocalFileHeader::SIZE];
        let got = read_up_to(&mut self.src, &mut fixed[..4])?;
        if got == 0 {
            self.at_end = true;
            return Ok(None);
        }
        let signature = u32::from_le_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]);
        if got == 4
            && matches!(
                signature,
                CentralDirectoryHeader::SIGNATURE | EndOfCentralDirectory::SIGNATURE | Zip64EOCD::SIGNATURE
            )
        {
            debug!("reached the central directory");
            self.at_end = true;
            return Ok(None);
        }
        if got < 4 || signature != LocalFileHeader::SIGNATURE {
            return Err(ZipError::invalid_archive(0, format!("unexpected signature {signature:#010x}")));
        }
        self.src.read_exact(&mut fixed[4..])?;
        let (lfh, name_len, extra_len) = LocalFileHeader::from_fixed(&fixed)?;

        let mut raw_name = vec![0u8; name_len];
        self.src.read_exact(&mut raw_name)?;
        let mut extra = vec![0u8; extra_len];
        self.src.read_exact(&mut extra)?;

        let name = decode(&raw_name, lfh.flags, self.encoding)?;
        let method = CompressionMethod::from_u16(lfh.method);
        let descriptor = lfh.flags & FLAG_DATA_DESCRIPTOR != 0;
        let zip64 = extra_records(&extra).find(|(tag, _)| *tag == ZIP64_EXTRA_ID);

        let mut entry = ZipEntry::new(name);
        entry.set_method(method);
        entry.set_dos_time(DosDateTime::new(lfh.mod_date, lfh.mod_time));
        if !descriptor {
            let mut size = lfh.uncompressed_size as u64;
            let mut csize = lfh.compressed_size as u64;
            if let Some((_, payload)) = zip64 {
                let z = Zip64Extra::parse(payload, size == ZIP64_LIMIT, csize == ZIP64_LIMIT, false);
                size = z.uncompressed_size.unwrap_or(size);
                csize = z.compressed_size.unwrap_or(csize);
            }
            entry.set_size(size);
            entry.set_compressed_size(csize);
            entry.set_crc(lfh.crc32);
        }
        let zip64_extra = zip64.is_some();
        entry.set_extra_unchecked(extra);
        entry.flags = lfh.flags;
        entry.version_needed = lfh.version_needed;
        entry.raw_name = raw_name;

        let inflater = match method {
            CompressionMethod::Deflated => Some(Inflater::raw()),
            CompressionMethod::Stored if descriptor => {
                return Err(ZipError::Unsupported(format!(
                    "STORED entry {} with a data descriptor",
                    entry.name()
                )));
            }
            CompressionMethod::Stored => None,
            CompressionMethod::Unknown(m) => return Err(ZipError::UnsupportedMethod(m)),
        };
        trace!("local header for {}", entry.name());

        self.current = Some(Current {
            remaining: entry.compressed_size().unwrap_or(0),
            entry: entry.clone(),
            inflater,
            descriptor,
            zip64_extra,
            crc: Crc32::new(),
            produced: 0,
            done: false,
            failure: None,
        });
        Ok(Some(entry))
    }

    pub fn into_inner(self) -> R {
        self.src.inner
    }
}

/// Read until `out` is full or the input ends.
fn read_up_to<R: Read>(r: &mut R, out: &mut [u8]) -> io::Result<usize> {
    let mut done = 0;
    while done < out.len() {
        let n = r.read(&mut out[done..])?;
        if n == 0 {
            break;
        }
        done += n;
    }
    Ok(done)
}

impl<R: Read> Read for ZipReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match self.current.as_mut() {
            Some(current) => current.read(&mut self.src, out),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::ZipWriter;
    use std::io::Write;

    /// A reader that hands out one byte per call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() || out.is_empty() {
                return Ok(0);
            }
            out[0] = self.0[0];
            self.0 = &self.0[1..];
            Ok(1)
        }
    }

    fn sample_archive() -> Vec<u8> {
        let mut w = ZipWriter::new(Vec::new());
        w.put_next_entry(ZipEntry::new("one.txt")).unwrap();
        w.write_all(&b"first entry ".repeat(300)).unwrap();
        w.close_entry().unwrap();

        let mut stored = ZipEntry::new("two.bin");
        stored.set_method(CompressionMethod::Stored);
        stored.set_size(4);
        stored.set_crc(Crc32::checksum(b"\x00\x01\x02\x03"));
        w.put_next_entry(stored).unwrap();
        w.write_all(b"\x00\x01\x02\x03").unwrap();
        w.close_entry().unwrap();

        w.put_next_entry(ZipEntry::new("dir/")).unwrap();
        w.into_inner().unwrap()
    }

    #[test]
    fn walks_local_headers() {
        let bytes = sample_archive();
        for source in [&mut &bytes[..] as &mut dyn Read, &mut Trickle(&bytes)] {
            let mut r = ZipReader::new(source);
            let first = r.next_entry().unwrap().unwrap();
            assert_eq!(first.name(), "one.txt");
            assert_eq!(first.size(), None);
            let mut data = Vec::new();
            r.read_to_end(&mut data).unwrap();
            assert_eq!(data, b"first entry ".repeat(300));
            assert_eq!(r.entry().unwrap().size(), Some(data.len() as u64));

            let second = r.next_entry().unwrap().unwrap();
            assert_eq!(second.size(), Some(4));
            // Left unread; next_entry skips it.
            let third = r.next_entry().unwrap().unwrap();
            assert!(third.is_dir());
            assert!(r.next_entry().unwrap().is_none());
            assert!(r.next_entry().unwrap().is_none());
        }
    }

    #[test]
    fn stored_with_descriptor_is_unsupported() {
        let lfh = LocalFileHeader {
            version_needed: VERSION_DEFAULT,
            flags: FLAG_DATA_DESCRIPTOR,
            method: CompressionMethod::Stored.as_u16(),
            name: b"x".to_vec(),
            ..Default::default()
        };
        let mut bytes = Vec::new();
        lfh.write_to(&mut bytes).unwrap();
        let mut r = ZipReader::new(&bytes[..]);
        assert!(matches!(r.next_entry(), Err(ZipError::Unsupported(_))));
    }

    #[test]
    fn corrupt_deflated_data_is_reported() {
        let mut bytes = sample_archive();
        // Flip a bit inside the first entry's compressed data.
        bytes[30 + 7 + 10] ^= 0x40;
        let mut r = ZipReader::new(&bytes[..]);
        r.next_entry().unwrap();
        assert!(r.read_to_end(&mut Vec::new()).is_err());
    }

    #[test]
    fn crc_failure_is_not_forgotten() {
        let data = [9u8; 64];
        let mut entry = ZipEntry::new("plain.bin");
        entry.set_method(CompressionMethod::Stored);
        entry.set_size(data.len() as u64);
        entry.set_crc(Crc32::checksum(&data));
        let mut w = ZipWriter::new(Vec::new());
        w.put_next_entry(entry).unwrap();
        w.write_all(&data).unwrap();
        w.close_entry().unwrap();
        let mut bytes = w.into_inner().unwrap();
        // Local header is 30 bytes plus the 9 byte name.
        bytes[39 + 20] ^= 0xFF;

        let mut r = ZipReader::new(&bytes[..]);
        r.next_entry().unwrap();
        assert!(r.read_to_end(&mut Vec::new()).is_err());
        let err = r.read(&mut [0u8; 8]).unwrap_err();
        assert!(matches!(ZipError::from_io_ref(&err), Some(ZipError::CrcMismatch { .. })));
        assert!(matches!(r.next_entry(), Err(ZipError::CrcMismatch { .. })));
    }
}
