//! Random-access reader driven by the central directory.

use encoding_rs::{Encoding, UTF_8};
use log::{debug, trace};
use std::collections::HashMap;
use std::io::{self, Read};

use super::entry::ZipEntry;
use super::parser::ZipParser;
use super::structures::CompressionMethod;
use crate::checksum::{Checksum, Crc32};
use crate::deflate::Inflater;
use crate::error::{ZipError, ZipResult};
use crate::io::ReadAt;

const READ_CHUNK: usize = 16 * 1024;

/// A ZIP archive opened through its central directory.
///
/// The directory is parsed once by [`new`](Self::new) and never changes
/// afterwards. Entry data is read with positional reads, so any number of
/// [`EntryReader`]s can be open at the same time, from several threads if
/// the archive is shared.
///
/// # Example
///
/// ```
/// use std::io::{Read, Write};
/// use zipcodec::zip::{ZipArchive, ZipEntry, ZipWriter};
///
/// let mut writer = ZipWriter::new(Vec::new());
/// writer.put_next_entry(ZipEntry::new("hello.txt")).unwrap();
/// writer.write_all(b"Hello, world!").unwrap();
/// let bytes = writer.into_inner().unwrap();
///
/// let archive = ZipArchive::new(bytes).unwrap();
/// let entry = archive.by_name("hello.txt").unwrap();
/// let mut text = String::new();
/// archive.open(entry).unwrap().read_to_string(&mut text).unwrap();
/// assert_eq!(text, "Hello, world!");
/// ```
pub struct ZipArchive<R: ReadAt> {
    parser: ZipParser<R>,
    entries: Vec<ZipEntry>,
    index: HashMap<String, usize>,
    comment: String,
}

impl<R: ReadAt> ZipArchive<R> {
    /// Open an archive whose legacy names are UTF-8.
    pub fn new(reader: R) -> ZipResult<Self> {
        Self::with_encoding(reader, UTF_8)
    }

    /// Open an archive, decoding names without flag bit 11 with `encoding`.
    pub fn with_encoding(reader: R, encoding: &'static Encoding) -> ZipResult<Self> {
        let parser = ZipParser::new(reader, encoding)?;
        let dir = parser.read_directory()?;
        debug!("opened archive with {} entries", dir.entries.len());

        let mut index = HashMap::with_capacity(dir.entries.len());
        for (i, entry) in dir.entries.iter().enumerate() {
            index.entry(entry.name().to_string()).or_insert(i);
        }
        Ok(Self {
            parser,
            entries: dir.entries,
            index,
            comment: dir.comment,
        })
    }

    /// Entries in central directory order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look an entry up by name. With duplicate names the first one wins.
    pub fn by_name(&self, name: &str) -> Option<&ZipEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn by_index(&self, index: usize) -> Option<&ZipEntry> {
        self.entries.get(index)
    }

    /// Archive comment; empty when there is none.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn get_ref(&self) -> &R {
        self.parser.reader()
    }

    /// Open an entry's data for reading.
    ///
    /// # Errors
    ///
    /// [`ZipError::StaleDirectory`] if the local header no longer matches
    /// the directory, [`ZipError::UnsupportedMethod`] for methods other than
    /// STORED and DEFLATED.
    pub fn open(&self, entry: &ZipEntry) -> ZipResult<EntryReader<'_, R>> {
        let inflater = match entry.method().unwrap_or_default() {
            CompressionMethod::Stored => None,
            CompressionMethod::Deflated => Some(Inflater::raw()),
            CompressionMethod::Unknown(m) => return Err(ZipError::UnsupportedMethod(m)),
        };
        let offset = self.parser.get_data_offset(entry)?;
        trace!("opening {} at data offset {offset}", entry.name());

        let compressed_size = entry.compressed_size().unwrap_or(0);
        Ok(EntryReader {
            data: DataSpan {
                source: self.parser.reader(),
                offset,
                remaining: compressed_size,
            },
            buf: if inflater.is_some() { vec![0u8; READ_CHUNK] } else { Vec::new() },
            inflater,
            name: entry.name().to_string(),
            compressed_size,
            size: entry.size().unwrap_or(0),
            expected_crc: entry.crc().unwrap_or(0),
            crc: Crc32::new(),
            produced: 0,
            done: false,
            failure: None,
        })
    }
}

/// The not yet consumed part of an entry's compressed data.
struct DataSpan<'a, R: ReadAt> {
    source: &'a R,
    offset: u64,
    remaining: u64,
}

impl<R: ReadAt> DataSpan<'_, R> {
    fn read(&mut self, buf: &mut [u8], name: &str) -> io::Result<usize> {
        let want = (buf.len() as u64).min(self.remaining) as usize;
        if want == 0 {
            return Ok(0);
        }
        let n = self.source.read_at(self.offset, &mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ends inside the data of {name}"),
            ));
        }
        self.offset += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Reader over one entry's uncompressed data.
///
/// Size and CRC are verified by the read that reports end of data; a
/// mismatch surfaces as an [`io::Error`] wrapping
/// [`ZipError::SizeMismatch`] or [`ZipError::CrcMismatch`].
pub struct EntryReader<'a, R: ReadAt> {
    data: DataSpan<'a, R>,
    inflater: Option<Inflater>,
    buf: Vec<u8>,
    name: String,
    compressed_size: u64,
    size: u64,
    expected_crc: u32,
    crc: Crc32,
    produced: u64,
    done: bool,
    /// Verification failure, reported again by every later read.
    failure: Option<ZipError>,
}

impl<R: ReadAt> EntryReader<'_, R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uncompressed size recorded in the directory.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn verify(&self) -> ZipResult<()> {
        if let Some(inflater) = &self.inflater
            && inflater.bytes_read() != self.compressed_size
        {
            return Err(ZipError::SizeMismatch {
                name: self.name.clone(),
                what: "compressed size",
                expected: self.compressed_size,
                actual: inflater.bytes_read(),
            });
        }
        if self.produced != self.size {
            return Err(ZipError::SizeMismatch {
                name: self.name.clone(),
                what: "size",
                expected: self.size,
                actual: self.produced,
            });
        }
        let actual = self.crc.value();
        if actual != self.expected_crc {
            return Err(ZipError::CrcMismatch {
                name: self.name.clone(),
                expected: self.expected_crc,
                actual,
            });
        }
        trace!("{} verified: {} bytes, crc {actual:#010x}", self.name, self.produced);
        Ok(())
    }
}

/// Inflate into `out`, pulling compressed bytes from `data` as needed.
/// Returns 0 once the deflate stream has ended.
fn inflate_from<R: ReadAt>(
    inflater: &mut Inflater,
    data: &mut DataSpan<'_, R>,
    buf: &mut [u8],
    out: &mut [u8],
    name: &str,
) -> io::Result<usize> {
    loop {
        let n = inflater.inflate(out)?;
        if n > 0 || inflater.finished() {
            return Ok(n);
        }
        if !inflater.needs_input() {
            return Err(ZipError::invalid_data("decompressor made no progress").into());
        }
        let got = data.read(buf, name)?;
        if got == 0 {
            return Err(ZipError::invalid_data(format!(
                "compressed data of {name} ends before the deflate stream"
            ))
            .into());
        }
        inflater.set_input(&buf[..got])?;
    }
}

impl<R: ReadAt> Read for EntryReader<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if let Some(err) = &self.failure {
            return Err(err.replay().into());
        }
        if self.done || out.is_empty() {
            return Ok(0);
        }
        let n = match self.inflater.as_mut() {
            None => self.data.read(out, &self.name)?,
            Some(inflater) => inflate_from(inflater, &mut self.data, &mut self.buf, out, &self.name)?,
        };
        if n == 0 {
            self.done = true;
            if let Err(err) = self.verify() {
                self.failure = Some(err.replay());
                return Err(err.into());
            }
            return Ok(0);
        }
        self.crc.update(&out[..n]);
        self.produced += n as u64;
        Ok(n)
    }
}
