use log::debug;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{ZipError, ZipResult};
use crate::io::ReadAt;

use super::archive::ZipArchive;
use super::entry::ZipEntry;

/// ZIP file extractor
pub struct ZipExtractor<R: ReadAt> {
    archive: ZipArchive<R>,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn new(reader: R) -> ZipResult<Self> {
        Ok(Self {
            archive: ZipArchive::new(reader)?,
        })
    }

    pub fn from_archive(archive: ZipArchive<R>) -> Self {
        Self { archive }
    }

    pub fn archive(&self) -> &ZipArchive<R> {
        &self.archive
    }

    /// List all files in the archive
    pub fn list_files(&self) -> &[ZipEntry] {
        self.archive.entries()
    }

    /// Extract file data to memory
    pub fn extract_to_memory(&self, entry: &ZipEntry) -> ZipResult<Vec<u8>> {
        let capacity = entry.size().unwrap_or(0).min(64 * 1024 * 1024) as usize;
        let mut buf = Vec::with_capacity(capacity);
        self.archive.open(entry)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Copy file data into `out`, returning the number of bytes written.
    pub fn extract_to<W: Write>(&self, entry: &ZipEntry, out: &mut W) -> ZipResult<u64> {
        let n = io::copy(&mut self.archive.open(entry)?, out)?;
        Ok(n)
    }

    /// Extract file to disk, creating parent directories as needed.
    /// Directory entries only create the directory.
    pub fn extract_to_file(&self, entry: &ZipEntry, output_path: &Path) -> ZipResult<()> {
        if entry.is_dir() {
            fs::create_dir_all(output_path)?;
            return Ok(());
        }
        if let Some(parent) = output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(output_path)?;
        self.extract_to(entry, &mut file)?;
        file.flush()?;
        Ok(())
    }

    /// Extract `entry` below `dir` under its own name and return the path
    /// written. Names that would land outside `dir` are refused.
    pub fn extract_into(&self, entry: &ZipEntry, dir: &Path) -> ZipResult<PathBuf> {
        let Some(relative) = entry.enclosed_name() else {
            return Err(ZipError::InvalidEntryName {
                name: entry.name().to_string(),
                reason: "name escapes the extraction directory",
            });
        };
        let output_path = dir.join(relative);
        self.extract_to_file(entry, &output_path)?;
        Ok(output_path)
    }

    /// Read every entry to its end, checking sizes and CRCs. Returns the
    /// names of the entries that failed together with their errors.
    pub fn test_all(&self) -> Vec<(String, ZipError)> {
        let mut failures = Vec::new();
        for entry in self.archive.entries() {
            if let Err(e) = self.extract_to(entry, &mut io::sink()) {
                debug!("{} failed verification: {e}", entry.name());
                failures.push((entry.name().to_string(), e));
            }
        }
        failures
    }
}
