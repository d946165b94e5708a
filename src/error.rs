//! Error types shared by the codec engines, the stream adapters and the
//! container reader/writer.
//!
//! Every failure carries an [`ErrorKind`] so callers can tell a misuse of
//! the API (bounds, state) apart from broken input (format, integrity).
//! "Needs more input" is never an error: the engines report it through
//! `needs_input()` and a zero return value instead.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type ZipResult<T> = Result<T, ZipError>;

/// Coarse classification of a [`ZipError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Offset/length outside of a buffer.
    Bounds,
    /// Corrupt compressed data or malformed container structure.
    Format,
    /// Call-order violation or use after `end()`/`close()`.
    State,
    /// CRC or size mismatch detected after consuming an entry.
    Integrity,
    /// Valid input using a feature this crate does not implement.
    Unsupported,
    /// Failure of the underlying byte source or sink.
    Io,
}

#[derive(Debug, Error)]
pub enum ZipError {
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    #[error("index out of bounds: offset {offset}, length {length}, capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        length: usize,
        capacity: usize,
    },

    #[error("invalid compressed data: {0}")]
    InvalidData(String),

    #[error("invalid zip structure at offset {offset}: {reason}")]
    InvalidArchive { offset: u64, reason: String },

    #[error("not a valid zip archive: {0}")]
    NotAZip(String),

    #[error("{0} has been closed")]
    Closed(&'static str),

    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("preset dictionary mismatch: stream expects adler32 {expected:#010x}, got {actual:#010x}")]
    DictionaryMismatch { expected: u32, actual: u32 },

    #[error("invalid entry CRC for {name}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },

    #[error("invalid entry {what} for {name}: expected {expected}, got {actual}")]
    SizeMismatch {
        name: String,
        what: &'static str,
        expected: u64,
        actual: u64,
    },

    #[error("stale or inconsistent central directory for {name}: {reason}")]
    StaleDirectory { name: String, reason: String },

    #[error("unsupported compression method {0}")]
    UnsupportedMethod(u16),

    #[error("unsupported zip feature: {0}")]
    Unsupported(String),

    #[error("invalid entry name {name:?}: {reason}")]
    InvalidEntryName { name: String, reason: &'static str },

    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("{0} exceeds the classic zip limits and ZIP64 is disabled")]
    Zip64Required(String),

    #[error("cannot {action} {text:?} with charset {charset}")]
    Encoding {
        action: &'static str,
        text: String,
        charset: &'static str,
    },
}

impl ZipError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ZipError::Io(_) => ErrorKind::Io,
            ZipError::OutOfBounds { .. } => ErrorKind::Bounds,
            ZipError::InvalidData(_)
            | ZipError::InvalidArchive { .. }
            | ZipError::NotAZip(_)
            | ZipError::InvalidEntryName { .. }
            | ZipError::Encoding { .. } => ErrorKind::Format,
            ZipError::Closed(_)
            | ZipError::IllegalState(_)
            | ZipError::InvalidArgument(_)
            | ZipError::DuplicateEntry(_)
            | ZipError::DictionaryMismatch { .. } => ErrorKind::State,
            ZipError::CrcMismatch { .. }
            | ZipError::SizeMismatch { .. }
            | ZipError::StaleDirectory { .. } => ErrorKind::Integrity,
            ZipError::UnsupportedMethod(_)
            | ZipError::Unsupported(_)
            | ZipError::Zip64Required(_) => ErrorKind::Unsupported,
        }
    }

    pub(crate) fn invalid_data(reason: impl Into<String>) -> Self {
        ZipError::InvalidData(reason.into())
    }

    pub(crate) fn invalid_archive(offset: u64, reason: impl Into<String>) -> Self {
        ZipError::InvalidArchive {
            offset,
            reason: reason.into(),
        }
    }

    /// A copy of this error for readers that report the same failure on
    /// every later call. Integrity and format details are kept; other
    /// variants are reduced to their message.
    pub(crate) fn replay(&self) -> ZipError {
        match self {
            ZipError::Io(e) => ZipError::Io(io::Error::new(e.kind(), e.to_string())),
            ZipError::CrcMismatch {
                name,
                expected,
                actual,
            } => ZipError::CrcMismatch {
                name: name.clone(),
                expected: *expected,
                actual: *actual,
            },
            ZipError::SizeMismatch {
                name,
                what,
                expected,
                actual,
            } => ZipError::SizeMismatch {
                name: name.clone(),
                what: *what,
                expected: *expected,
                actual: *actual,
            },
            ZipError::InvalidArchive { offset, reason } => ZipError::InvalidArchive {
                offset: *offset,
                reason: reason.clone(),
            },
            ZipError::StaleDirectory { name, reason } => ZipError::StaleDirectory {
                name: name.clone(),
                reason: reason.clone(),
            },
            other => ZipError::InvalidData(other.to_string()),
        }
    }

    /// Recover a `ZipError` that was converted into an `io::Error` by one of
    /// the `Read`/`Write` adapters.
    pub fn from_io_ref(err: &io::Error) -> Option<&ZipError> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<ZipError>())
    }
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> Self {
        let kind = match err.kind() {
            ErrorKind::Io => {
                if let ZipError::Io(inner) = err {
                    return inner;
                }
                io::ErrorKind::Other
            }
            ErrorKind::Bounds => io::ErrorKind::InvalidInput,
            ErrorKind::Format | ErrorKind::Integrity => io::ErrorKind::InvalidData,
            ErrorKind::State | ErrorKind::Unsupported => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Unwraps errors produced by the `Read`/`Write` adapters back into the
/// `ZipError` they carry; any other I/O error becomes [`ZipError::Io`].
impl From<io::Error> for ZipError {
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<ZipError>()) {
            return ZipError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<ZipError>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => ZipError::Io(io::Error::new(kind, other)),
            None => ZipError::Io(kind.into()),
        }
    }
}

/// Validate an `(offset, length)` pair against a buffer length.
pub(crate) fn check_range(capacity: usize, offset: usize, length: usize) -> ZipResult<()> {
    match offset.checked_add(length) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(ZipError::OutOfBounds {
            offset,
            length,
            capacity,
        }),
    }
}
