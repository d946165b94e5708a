//! Sequential archive writer.

use encoding_rs::{Encoding, UTF_8};
use log::{debug, trace, warn};
use std::collections::HashSet;
use std::io::{self, Write};
use time::OffsetDateTime;

use super::encoding::encode;
use super::entry::{DosDateTime, ZipEntry, validate_name};
use super::structures::*;
use crate::checksum::{Checksum, Crc32};
use crate::deflate::{Deflater, Level};
use crate::error::{ZipError, ZipResult};

/// When to write ZIP64 records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zip64Mode {
    /// Only where a size, offset or count does not fit the classic fields.
    #[default]
    Auto,
    /// ZIP64 local extras and end records for every archive.
    Always,
    /// Never; values that need ZIP64 fail with
    /// [`ZipError::Zip64Required`]. Entry counts wrap modulo 0x10000.
    Never,
}

/// Unix `drwxr-xr-x` plus the MS-DOS directory bit.
const DIR_ATTRIBUTES: u32 = (0o040755 << 16) | 0x10;
/// Unix `-rw-r--r--`.
const FILE_ATTRIBUTES: u32 = 0o100644 << 16;

struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// The entry currently receiving data.
struct OpenEntry {
    entry: ZipEntry,
    method: CompressionMethod,
    descriptor: bool,
    zip64_local: bool,
    crc: Crc32,
    written: u64,
}

/// Writes entries one after another, then the central directory.
///
/// ```text
/// put_next_entry -> write* -> close_entry -> ... -> finish / close / into_inner
/// ```
///
/// Entries are DEFLATED unless configured otherwise. A DEFLATED entry whose
/// size, compressed size and CRC are all known up front is written without a
/// data descriptor and checked against those values when it is closed; any
/// other DEFLATED entry gets flag bit 3 and a descriptor after its data.
/// STORED entries must carry their size and CRC before data is written.
pub struct ZipWriter<W: Write> {
    inner: CountingWriter<W>,
    deflater: Deflater,
    buf: Vec<u8>,
    level: Level,
    method: CompressionMethod,
    zip64_mode: Zip64Mode,
    encoding: &'static Encoding,
    comment: Vec<u8>,
    entries: Vec<ZipEntry>,
    names: HashSet<String>,
    current: Option<OpenEntry>,
    /// Set when an entry could not be completed; its bytes are already in
    /// the sink, so no consistent directory can follow.
    failed: bool,
    finished: bool,
    closed: bool,
}

impl<W: Write> ZipWriter<W> {
    /// A writer storing names as UTF-8.
    pub fn new(inner: W) -> Self {
        Self::with_encoding(inner, UTF_8)
    }

    /// A writer storing names and comments in `encoding`.
    pub fn with_encoding(inner: W, encoding: &'static Encoding) -> Self {
        Self {
            inner: CountingWriter { inner, count: 0 },
            deflater: Deflater::raw(Level::Default),
            buf: vec![0u8; 16 * 1024],
            level: Level::Default,
            method: CompressionMethod::Deflated,
            zip64_mode: Zip64Mode::Auto,
            encoding,
            comment: Vec::new(),
            entries: Vec::new(),
            names: HashSet::new(),
            current: None,
            failed: false,
            finished: false,
            closed: false,
        }
    }

    /// Compression level for entries opened after this call.
    pub fn set_level(&mut self, level: Level) {
        self.level = level;
    }

    /// Method for entries that do not set one themselves.
    pub fn set_method(&mut self, method: CompressionMethod) -> ZipResult<()> {
        if let CompressionMethod::Unknown(m) = method {
            return Err(ZipError::UnsupportedMethod(m));
        }
        self.method = method;
        Ok(())
    }

    pub fn set_zip64_mode(&mut self, mode: Zip64Mode) {
        self.zip64_mode = mode;
    }

    /// Archive comment, encoded like entry names.
    pub fn set_comment(&mut self, comment: &str) -> ZipResult<()> {
        let (bytes, _) = encode(comment, self.encoding)?;
        if bytes.len() > 0xFFFF {
            return Err(ZipError::InvalidArgument(format!(
                "archive comment of {} bytes exceeds 65535",
                bytes.len()
            )));
        }
        self.comment = bytes;
        Ok(())
    }

    /// Bytes written to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.inner.count
    }

    fn ensure_writable(&self) -> ZipResult<()> {
        if self.closed {
            return Err(ZipError::Closed("ZipWriter"));
        }
        if self.finished {
            return Err(ZipError::IllegalState("archive already finished"));
        }
        if self.failed {
            return Err(ZipError::IllegalState("an earlier entry failed; the archive is incomplete"));
        }
        Ok(())
    }

    fn needs_zip64(&self, value: u64, what: &str) -> ZipResult<bool> {
        let over = value >= ZIP64_LIMIT;
        if over && self.zip64_mode == Zip64Mode::Never {
            return Err(ZipError::Zip64Required(format!("{what} {value}")));
        }
        Ok(over)
    }

    /// Begin a new entry and write its local header.
    ///
    /// # Errors
    ///
    /// [`ZipError::IllegalState`] while another entry is still open,
    /// [`ZipError::InvalidEntryName`], [`ZipError::DuplicateEntry`],
    /// [`ZipError::Encoding`] for a name the charset cannot represent, and
    /// [`ZipError::InvalidArgument`] for a STORED entry without size and CRC.
    pub fn put_next_entry(&mut self, mut entry: ZipEntry) -> ZipResult<()> {
        self.ensure_writable()?;
        if self.current.is_some() {
            return Err(ZipError::IllegalState("previous entry has not been closed"));
        }

        let (raw_name, mut flags) = encode(entry.name(), self.encoding)?;
        validate_name(entry.name(), raw_name.len())?;
        if self.names.contains(entry.name()) {
            return Err(ZipError::DuplicateEntry(entry.name().to_string()));
        }

        if entry.dos_time().is_none() {
            match entry.last_modified_time() {
                Some(t) => entry.set_dos_time(DosDateTime::from_datetime(t)),
                None => entry.set_time(OffsetDateTime::now_utc()),
            }
        }

        let method = entry.method().unwrap_or(self.method);
        entry.set_method(method);
        let descriptor = match method {
            CompressionMethod::Stored => {
                let (Some(size), Some(_)) = (entry.size(), entry.crc()) else {
                    return Err(ZipError::InvalidArgument(format!(
                        "STORED entry {} needs its size and crc before data",
                        entry.name()
                    )));
                };
                match entry.compressed_size() {
                    Some(csize) if csize != size => {
                        return Err(ZipError::InvalidArgument(format!(
                            "STORED entry {} has compressed size {csize} but size {size}",
                            entry.name()
                        )));
                    }
                    _ => entry.set_compressed_size(size),
                }
                false
            }
            CompressionMethod::Deflated => {
                entry.size().is_none() || entry.compressed_size().is_none() || entry.crc().is_none()
            }
            CompressionMethod::Unknown(m) => return Err(ZipError::UnsupportedMethod(m)),
        };
        if descriptor {
            flags |= FLAG_DATA_DESCRIPTOR;
        }

        let lfh_offset = self.inner.count;
        self.needs_zip64(lfh_offset, "local header offset")?;
        let large_sizes = self.needs_zip64(entry.size().unwrap_or(0), "entry size")?
            | self.needs_zip64(entry.compressed_size().unwrap_or(0), "compressed size")?;
        let zip64_local = self.zip64_mode == Zip64Mode::Always || large_sizes;

        let dos = entry.dos_time().unwrap_or(DosDateTime::MIN);
        let mut lfh = LocalFileHeader {
            version_needed: if zip64_local { VERSION_ZIP64 } else { VERSION_DEFAULT },
            flags,
            method: method.as_u16(),
            mod_time: dos.time,
            mod_date: dos.date,
            ..Default::default()
        };
        let zip64 = if zip64_local {
            lfh.compressed_size = ZIP64_LIMIT as u32;
            lfh.uncompressed_size = ZIP64_LIMIT as u32;
            lfh.crc32 = if descriptor { 0 } else { entry.crc().unwrap_or(0) };
            Some(Zip64Extra {
                uncompressed_size: Some(if descriptor { 0 } else { entry.size().unwrap_or(0) }),
                compressed_size: Some(if descriptor { 0 } else { entry.compressed_size().unwrap_or(0) }),
                lfh_offset: None,
            })
        } else {
            if !descriptor {
                lfh.crc32 = entry.crc().unwrap_or(0);
                lfh.compressed_size = entry.compressed_size().unwrap_or(0) as u32;
                lfh.uncompressed_size = entry.size().unwrap_or(0) as u32;
            }
            None
        };
        lfh.extra = entry.header_extra(zip64, false);
        if lfh.extra.len() > 0xFFFF {
            return Err(ZipError::InvalidArgument(format!(
                "extra field of {} exceeds 65535 bytes",
                entry.name()
            )));
        }
        lfh.name = raw_name.clone();
        lfh.write_to(&mut self.inner)?;

        if method == CompressionMethod::Deflated {
            self.deflater.reset()?;
            self.deflater.set_level(self.level)?;
        }

        entry.flags = flags;
        entry.version_needed = lfh.version_needed;
        entry.lfh_offset = lfh_offset;
        entry.raw_name = raw_name;
        self.names.insert(entry.name().to_string());
        debug!(
            "entry {} opened at {lfh_offset}: {method:?}{}{}",
            entry.name(),
            if descriptor { ", data descriptor" } else { "" },
            if zip64_local { ", zip64" } else { "" }
        );

        self.current = Some(OpenEntry {
            entry,
            method,
            descriptor,
            zip64_local,
            crc: Crc32::new(),
            written: 0,
        });
        Ok(())
    }

    fn pump(&mut self) -> ZipResult<()> {
        let n = self.deflater.deflate(&mut self.buf)?;
        self.inner.write_all(&self.buf[..n])?;
        Ok(())
    }

    fn write_entry_data(&mut self, data: &[u8]) -> ZipResult<()> {
        self.ensure_writable()?;
        let Some(current) = self.current.as_mut() else {
            return Err(ZipError::IllegalState("no entry is open"));
        };
        current.crc.update(data);
        current.written += data.len() as u64;
        match current.method {
            CompressionMethod::Deflated => {
                self.deflater.set_input(data)?;
                while !self.deflater.needs_input() {
                    self.pump()?;
                }
            }
            _ => self.inner.write_all(data)?,
        }
        Ok(())
    }

    /// Complete the current entry: flush its compressed data, check preset
    /// values and write the data descriptor if one is due. Does nothing when
    /// no entry is open.
    ///
    /// A failure here leaves the entry's header and data in the sink without
    /// a directory record, so the writer refuses every later call except
    /// dropping it.
    ///
    /// # Errors
    ///
    /// [`ZipError::SizeMismatch`] or [`ZipError::CrcMismatch`] when the data
    /// written disagrees with values set on the entry beforehand.
    pub fn close_entry(&mut self) -> ZipResult<()> {
        if self.current.is_none() {
            return Ok(());
        }
        self.ensure_writable()?;
        let result = self.complete_entry();
        if let Err(e) = &result {
            let name = self.current.take().map(|c| c.entry.name().to_string());
            warn!("entry {} failed, writer is unusable: {e}", name.unwrap_or_default());
            self.failed = true;
        }
        result
    }

    fn complete_entry(&mut self) -> ZipResult<()> {
        let compressed = match self.current.as_ref().map(|c| c.method) {
            Some(CompressionMethod::Deflated) => {
                self.deflater.finish()?;
                while !self.deflater.finished() {
                    self.pump()?;
                }
                Some(self.deflater.bytes_written())
            }
            _ => None,
        };
        let Some(current) = self.current.as_ref() else {
            return Ok(());
        };
        let (descriptor, zip64_local, written) =
            (current.descriptor, current.zip64_local, current.written);
        let crc = current.crc.value();
        let compressed = compressed.unwrap_or(written);

        if !descriptor {
            let entry = &current.entry;
            check_size(entry, "size", entry.size(), written)?;
            check_size(entry, "compressed size", entry.compressed_size(), compressed)?;
            if let Some(expected) = entry.crc()
                && expected != crc
            {
                return Err(ZipError::CrcMismatch {
                    name: entry.name().to_string(),
                    expected,
                    actual: crc,
                });
            }
        } else {
            let large = self.needs_zip64(written, "entry size")?
                | self.needs_zip64(compressed, "compressed size")?;
            let zip64 = zip64_local || large;
            DataDescriptor {
                crc32: crc,
                compressed_size: compressed,
                uncompressed_size: written,
            }
            .write_to(&mut self.inner, zip64)?;
            trace!(
                "data descriptor for {}: crc {crc:#010x}, {compressed}/{written} bytes{}",
                current.entry.name(),
                if zip64 { ", 8-byte sizes" } else { "" }
            );
        }

        let Some(OpenEntry { mut entry, .. }) = self.current.take() else {
            return Ok(());
        };
        entry.set_size(written);
        entry.set_compressed_size(compressed);
        entry.set_crc(crc);
        debug!("entry {} closed: {written} bytes, {compressed} compressed", entry.name());
        self.entries.push(entry);
        Ok(())
    }

    /// Close the open entry, then write the central directory and end
    /// records. Further calls have no effect.
    pub fn finish(&mut self) -> ZipResult<()> {
        if self.finished {
            return Ok(());
        }
        if self.closed {
            return Err(ZipError::Closed("ZipWriter"));
        }
        if self.failed {
            return Err(ZipError::IllegalState("an earlier entry failed; the archive is incomplete"));
        }
        self.close_entry()?;

        let cd_offset = self.inner.count;
        for entry in &self.entries {
            let size = entry.size().unwrap_or(0);
            let csize = entry.compressed_size().unwrap_or(0);
            let z = Zip64Extra {
                uncompressed_size: (size >= ZIP64_LIMIT).then_some(size),
                compressed_size: (csize >= ZIP64_LIMIT).then_some(csize),
                lfh_offset: (entry.lfh_offset >= ZIP64_LIMIT).then_some(entry.lfh_offset),
            };
            let zip64 = (!z.is_empty()).then_some(z);
            let dos = entry.dos_time().unwrap_or(DosDateTime::MIN);
            let comment = match entry.comment() {
                Some(text) => encode(text, self.encoding)?.0,
                None => Vec::new(),
            };
            if comment.len() > 0xFFFF {
                return Err(ZipError::InvalidArgument(format!(
                    "comment of {} exceeds 65535 bytes",
                    entry.name()
                )));
            }
            let version_needed = if zip64.is_some() { VERSION_ZIP64 } else { entry.version_needed };

            let header = CentralDirectoryHeader {
                version_made_by: VERSION_MADE_BY,
                version_needed,
                flags: entry.flags,
                method: entry.method().unwrap_or_default().as_u16(),
                mod_time: dos.time,
                mod_date: dos.date,
                crc32: entry.crc().unwrap_or(0),
                compressed_size: csize.min(ZIP64_LIMIT) as u32,
                uncompressed_size: size.min(ZIP64_LIMIT) as u32,
                disk_number_start: 0,
                internal_attrs: 0,
                external_attrs: if entry.is_dir() { DIR_ATTRIBUTES } else { FILE_ATTRIBUTES },
                lfh_offset: entry.lfh_offset.min(ZIP64_LIMIT) as u32,
                name: entry.raw_name.clone(),
                extra: entry.header_extra(zip64, true),
                comment,
            };
            header.write_to(&mut self.inner)?;
        }

        let cd_size = self.inner.count - cd_offset;
        let total = self.entries.len() as u64;
        let zip64_end = match self.zip64_mode {
            Zip64Mode::Always => true,
            Zip64Mode::Never => {
                self.needs_zip64(cd_offset, "central directory offset")?;
                self.needs_zip64(cd_size, "central directory size")?;
                false
            }
            Zip64Mode::Auto => {
                total >= ZIP64_COUNT_LIMIT || cd_offset >= ZIP64_LIMIT || cd_size >= ZIP64_LIMIT
            }
        };

        if zip64_end {
            let eocd64_offset = self.inner.count;
            Zip64EOCD::new(total, cd_size, cd_offset).write_to(&mut self.inner)?;
            Zip64EOCDLocator {
                disk_with_eocd64: 0,
                eocd64_offset,
                total_disks: 1,
            }
            .write_to(&mut self.inner)?;
            debug!("ZIP64 end records at {eocd64_offset} for {total} entries");
        }

        let count = if zip64_end {
            total.min(ZIP64_COUNT_LIMIT) as u16
        } else {
            (total & 0xFFFF) as u16
        };
        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: count,
            total_entries: count,
            cd_size: cd_size.min(ZIP64_LIMIT) as u32,
            cd_offset: cd_offset.min(ZIP64_LIMIT) as u32,
            comment_len: self.comment.len() as u16,
        }
        .write_to(&mut self.inner)?;
        self.inner.write_all(&self.comment)?;

        self.finished = true;
        debug!(
            "archive finished: {total} entries, central directory {cd_size} bytes at {cd_offset}"
        );
        Ok(())
    }

    /// Finish the archive and flush the sink. Further calls have no effect.
    pub fn close(&mut self) -> ZipResult<()> {
        if self.closed {
            return Ok(());
        }
        self.finish()?;
        self.inner.flush()?;
        self.deflater.end();
        self.closed = true;
        Ok(())
    }

    /// Finish the archive and return the sink.
    pub fn into_inner(mut self) -> ZipResult<W> {
        if !self.closed {
            self.finish()?;
        }
        Ok(self.inner.inner)
    }
}

fn check_size(entry: &ZipEntry, what: &'static str, expected: Option<u64>, actual: u64) -> ZipResult<()> {
    match expected {
        Some(expected) if expected != actual => Err(ZipError::SizeMismatch {
            name: entry.name().to_string(),
            what,
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}

impl<W: Write> Write for ZipWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        self.write_entry_data(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
