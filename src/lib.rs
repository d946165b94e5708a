//! # zipcodec
//!
//! A ZIP container reader/writer built on its own streaming DEFLATE engine.
//!
//! The crate is layered bottom-up:
//!
//! - [`checksum`]: incremental CRC-32 and Adler-32
//! - [`deflate`]: streaming [`Deflater`](deflate::Deflater) and
//!   [`Inflater`](deflate::Inflater) sessions, raw or zlib-wrapped
//! - [`stream`]: `Read`/`Write` adapters over those sessions
//! - [`zip`]: entries, the archive writer and two readers, one driven by the
//!   central directory and one walking local headers front to back
//! - [`io`]: positional byte sources for the directory-backed reader
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use zipcodec::{LocalFileReader, ZipExtractor};
//!
//! fn main() -> anyhow::Result<()> {
//!     let reader = LocalFileReader::new(Path::new("archive.zip"))?;
//!     let extractor = ZipExtractor::new(reader)?;
//!
//!     for entry in extractor.list_files() {
//!         println!("{} ({:?} bytes)", entry.name(), entry.size());
//!     }
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod cli;
pub mod deflate;
pub mod error;
pub mod io;
pub mod stream;
pub mod zip;

pub use cli::Cli;
pub use error::{ErrorKind, ZipError, ZipResult};
pub use io::{LocalFileReader, ReadAt};
pub use zip::{ZipArchive, ZipEntry, ZipExtractor, ZipReader, ZipWriter};
