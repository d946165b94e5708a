//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If a ZIP64 locator precedes it, read the ZIP64 EOCD for the 64-bit
//!    counts and offsets
//! 3. Read the Central Directory to get metadata for all entries
//! 4. For extraction, re-read each entry's Local File Header and check it
//!    against the cached directory before touching the data

use encoding_rs::Encoding;
use log::{debug, warn};
use std::io::Cursor;

use super::encoding::decode;
use super::entry::{DosDateTime, ZipEntry};
use super::structures::*;
use crate::error::{ZipError, ZipResult};
use crate::io::ReadAt;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Contents of a parsed central directory.
#[derive(Debug, Default)]
pub(crate) struct Directory {
    pub entries: Vec<ZipEntry>,
    pub comment: String,
}

/// Low-level ZIP file parser.
///
/// Typically used through [`ZipArchive`](super::ZipArchive) rather than
/// directly.
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: R,
    /// Total size of the archive when it was opened
    size: u64,
    encoding: &'static Encoding,
}

impl<R: ReadAt> ZipParser<R> {
    /// Create a parser decoding legacy (non-UTF-8) names with `encoding`.
    pub fn new(reader: R, encoding: &'static Encoding) -> ZipResult<Self> {
        let size = reader.size()?;
        Ok(Self {
            reader,
            size,
            encoding,
        })
    }

    /// Size of the source when the parser was created.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Handles both the simple case (no comment) and archives with comments
    /// by searching backwards for the signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    ///
    /// # Errors
    ///
    /// [`ZipError::NotAZip`] if no valid EOCD can be found.
    pub fn find_eocd(&self) -> ZipResult<(EndOfCentralDirectory, u64)> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            return Err(ZipError::NotAZip(format!(
                "{} bytes is too short for an end of central directory record",
                self.size
            )));
        }

        // Optimization: First try the simple case where there's no comment.
        let offset = self.size - eocd_size;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf)?;
        if buf[..4] == EndOfCentralDirectory::SIGNATURE.to_le_bytes() && buf[20..22] == [0, 0] {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            debug!("end of central directory at {offset}");
            return Ok((eocd, offset));
        }

        // EOCD not at expected location - the archive has a comment.
        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(self.size);
        let search_start = self.size - search_size;
        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf)?;

        let signature = EndOfCentralDirectory::SIGNATURE.to_le_bytes();
        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if buf[i..i + 4] != signature {
                continue;
            }
            // The comment length field should match the remaining bytes.
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                let eocd = EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
                let offset = search_start + i as u64;
                debug!("end of central directory at {offset} with {comment_len} byte comment");
                return Ok((eocd, offset));
            }
        }

        Err(ZipError::NotAZip("end of central directory not found".into()))
    }

    /// Read the ZIP64 End of Central Directory record, if the archive has
    /// a locator immediately before the classic EOCD.
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> ZipResult<Option<(Zip64EOCD, u64)>> {
        let Some(locator_offset) = eocd_offset.checked_sub(Zip64EOCDLocator::SIZE as u64) else {
            return Ok(None);
        };
        let mut locator_buf = [0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut locator_buf)?;
        let Some(locator) = Zip64EOCDLocator::from_bytes(&locator_buf)? else {
            return Ok(None);
        };

        if locator.eocd64_offset + Zip64EOCD::MIN_SIZE as u64 > locator_offset {
            return Err(ZipError::NotAZip(format!(
                "ZIP64 end of central directory offset {} is out of range",
                locator.eocd64_offset
            )));
        }
        let mut eocd64_buf = [0u8; Zip64EOCD::MIN_SIZE];
        self.reader.read_exact_at(locator.eocd64_offset, &mut eocd64_buf)?;
        let eocd64 = Zip64EOCD::from_bytes(&eocd64_buf)?;
        debug!(
            "ZIP64 end of central directory at {}: {} entries",
            locator.eocd64_offset, eocd64.total_entries
        );
        Ok(Some((eocd64, locator.eocd64_offset)))
    }

    /// Read the central directory and the archive comment.
    pub(crate) fn read_directory(&self) -> ZipResult<Directory> {
        let (eocd, eocd_offset) = self.find_eocd()?;

        let zip64 = match self.read_zip64_eocd(eocd_offset) {
            Ok(found) => found,
            Err(e) if !eocd.is_zip64() => {
                warn!("ignoring unreadable ZIP64 records: {e}");
                None
            }
            Err(e) => return Err(e),
        };
        let saturated = eocd.cd_size == u32::MAX || eocd.cd_offset == u32::MAX;
        if zip64.is_none() && saturated {
            return Err(ZipError::NotAZip("ZIP64 end of central directory locator missing".into()));
        }

        // Get Central Directory info, using ZIP64 if present
        let (cd_offset, cd_size, total_entries, cd_end_limit) = match &zip64 {
            Some((eocd64, offset)) => (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries, *offset),
            None => (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
                eocd_offset,
            ),
        };

        if cd_offset.checked_add(cd_size).is_none_or(|end| end > cd_end_limit) {
            return Err(ZipError::NotAZip(format!(
                "central directory ({cd_size} bytes at {cd_offset}) overlaps the end records"
            )));
        }

        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut cd_data)?;

        let mut entries = Vec::with_capacity(total_entries.min(cd_size / 46) as usize);
        let mut cursor = Cursor::new(&cd_data[..]);
        while cursor.position() < cd_size {
            let at = cd_offset + cursor.position();
            let header = CentralDirectoryHeader::read_from(&mut cursor)
                .map_err(|e| ZipError::invalid_archive(at, format!("central directory header: {e}")))?;
            entries.push(self.parse_cdfh(header, at)?);
        }

        // Classic counts are 16 bits wide; writers that refuse ZIP64 let
        // them wrap, so only the low bits are comparable.
        let found = entries.len() as u64;
        let consistent = if zip64.is_some() {
            found == total_entries
        } else {
            found & 0xFFFF == total_entries
        };
        if !consistent {
            return Err(ZipError::invalid_archive(
                cd_offset,
                format!("central directory holds {found} entries, end record says {total_entries}"),
            ));
        }

        let comment_start = eocd_offset + EndOfCentralDirectory::SIZE as u64;
        let mut comment = vec![0u8; eocd.comment_len as usize];
        self.reader.read_exact_at(comment_start, &mut comment)?;
        let (comment, _) = self.encoding.decode_without_bom_handling(&comment);

        Ok(Directory {
            entries,
            comment: comment.into_owned(),
        })
    }

    /// Turn a central directory header into an entry, resolving ZIP64
    /// values from the extra field.
    fn parse_cdfh(&self, header: CentralDirectoryHeader, at: u64) -> ZipResult<ZipEntry> {
        let mut size = header.uncompressed_size as u64;
        let mut csize = header.compressed_size as u64;
        let mut lfh_offset = header.lfh_offset as u64;

        let want_size = size == ZIP64_LIMIT;
        let want_csize = csize == ZIP64_LIMIT;
        let want_offset = lfh_offset == ZIP64_LIMIT;
        if want_size || want_csize || want_offset {
            let payload = extra_records(&header.extra)
                .find(|(tag, _)| *tag == ZIP64_EXTRA_ID)
                .map(|(_, payload)| payload)
                .unwrap_or_default();
            let z = Zip64Extra::parse(payload, want_size, want_csize, want_offset);
            size = z.uncompressed_size.unwrap_or(size);
            csize = z.compressed_size.unwrap_or(csize);
            lfh_offset = z.lfh_offset.unwrap_or(lfh_offset);
        }

        let name = decode(&header.name, header.flags, self.encoding)
            .map_err(|e| ZipError::invalid_archive(at, e.to_string()))?;

        let mut entry = ZipEntry::new(name);
        entry.set_method(CompressionMethod::from_u16(header.method));
        entry.set_size(size);
        entry.set_compressed_size(csize);
        entry.set_crc(header.crc32);
        entry.set_dos_time(DosDateTime::new(header.mod_date, header.mod_time));
        entry.set_extra_unchecked(header.extra);
        if !header.comment.is_empty() {
            let comment = decode(&header.comment, header.flags, self.encoding)
                .map_err(|e| ZipError::invalid_archive(at, e.to_string()))?;
            entry.set_comment(comment);
        }
        entry.flags = header.flags;
        entry.version_needed = header.version_needed;
        entry.lfh_offset = lfh_offset;
        entry.raw_name = header.name;
        Ok(entry)
    }

    /// Get the data offset for an entry after checking that its local file
    /// header still agrees with the cached central directory.
    ///
    /// # Errors
    ///
    /// [`ZipError::StaleDirectory`] when the source changed length since the
    /// parser was created, or when the local header is missing, names a
    /// different entry or method, or points at data past the end of the
    /// source.
    pub fn get_data_offset(&self, entry: &ZipEntry) -> ZipResult<u64> {
        let stale = |reason: String| ZipError::StaleDirectory {
            name: entry.name().to_string(),
            reason,
        };

        let current = self.reader.size()?;
        if current != self.size {
            return Err(stale(format!(
                "source length changed from {} to {current} bytes since open",
                self.size
            )));
        }
        let header_end = entry.lfh_offset + LocalFileHeader::SIZE as u64;
        if header_end > self.size {
            return Err(stale(format!(
                "local header at {} is past the end of the source",
                entry.lfh_offset
            )));
        }

        let mut lfh_buf = [0u8; LocalFileHeader::SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut lfh_buf)?;
        let (lfh, name_len, extra_len) = LocalFileHeader::from_fixed(&lfh_buf)
            .map_err(|_| stale(format!("no local header signature at {}", entry.lfh_offset)))?;

        if name_len != entry.raw_name.len() || header_end + name_len as u64 > self.size {
            return Err(stale("local header name differs".into()));
        }
        let mut name = vec![0u8; name_len];
        self.reader.read_exact_at(header_end, &mut name)?;
        if name != entry.raw_name {
            return Err(stale("local header name differs".into()));
        }
        if Some(CompressionMethod::from_u16(lfh.method)) != entry.method() {
            return Err(stale(format!("local header method {} differs", lfh.method)));
        }

        // Data starts after: LFH (30 bytes) + filename + extra field
        let data_offset = header_end + name_len as u64 + extra_len as u64;
        let csize = entry.compressed_size().unwrap_or(0);
        if data_offset.checked_add(csize).is_none_or(|end| end > self.size) {
            return Err(stale(format!(
                "{csize} bytes of data at {data_offset} extend past the end of the source"
            )));
        }
        Ok(data_offset)
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &R {
        &self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::UTF_8;

    fn empty_archive(comment: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        EndOfCentralDirectory {
            comment_len: comment.len() as u16,
            ..Default::default()
        }
        .write_to(&mut buf)
        .unwrap();
        buf.extend_from_slice(comment);
        buf
    }

    #[test]
    fn zero_length_source_is_not_a_zip() {
        let parser = ZipParser::new(Vec::new(), UTF_8).unwrap();
        assert!(matches!(parser.find_eocd(), Err(ZipError::NotAZip(_))));
    }

    #[test]
    fn empty_archive_with_comment() {
        let data = empty_archive(b"hello archive");
        let parser = ZipParser::new(data, UTF_8).unwrap();
        let (_, offset) = parser.find_eocd().unwrap();
        assert_eq!(offset, 0);
        let dir = parser.read_directory().unwrap();
        assert!(dir.entries.is_empty());
        assert_eq!(dir.comment, "hello archive");
    }

    #[test]
    fn garbage_is_rejected() {
        let parser = ZipParser::new(vec![0x55u8; 4096], UTF_8).unwrap();
        assert!(matches!(parser.read_directory(), Err(ZipError::NotAZip(_))));
    }

    #[test]
    fn directory_bounds_are_checked() {
        let mut buf = Vec::new();
        EndOfCentralDirectory {
            disk_entries: 1,
            total_entries: 1,
            cd_size: 46,
            cd_offset: 0,
            ..Default::default()
        }
        .write_to(&mut buf)
        .unwrap();
        let parser = ZipParser::new(buf, UTF_8).unwrap();
        assert!(matches!(parser.read_directory(), Err(ZipError::NotAZip(_))));
    }
}
