//! ZIP archive reading and writing.
//!
//! This module provides a sequential writer, a random-access reader driven
//! by the central directory and a forward-only streaming reader, all
//! supporting the ZIP64 extensions for large archives.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`entry`]: Per-entry metadata, DOS and extended timestamps
//! - [`parser`]: Low-level parsing of the end records and central directory
//! - [`ZipArchive`]: Random access through the central directory
//! - [`ZipReader`]: Forward-only reading of local headers
//! - [`ZipWriter`]: Sequential writing
//! - [`ZipExtractor`]: High-level extraction API for end users
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB and more than 65534 entries
//! - STORED (no compression) method
//! - DEFLATE compression method
//! - Data descriptors, signed or not
//! - Extended timestamps (extra field 0x5455)
//! - UTF-8 names (flag bit 11) and legacy code pages
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods

mod archive;
mod encoding;
pub mod entry;
mod extractor;
pub mod parser;
mod stream_reader;
pub mod structures;
mod writer;

pub use archive::{EntryReader, ZipArchive};
pub use entry::{DosDateTime, ZipEntry};
pub use extractor::ZipExtractor;
pub use parser::ZipParser;
pub use stream_reader::ZipReader;
pub use structures::CompressionMethod;
pub use writer::{Zip64Mode, ZipWriter};
