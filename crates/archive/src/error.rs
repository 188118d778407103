//! Archive Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error tree
//! construction. Lower-level I/O, walk and decoding errors are kept as children
//! of the [`ErrorKind`] frame that names what was being attempted.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// An entry name or link target was rejected by the path policy. Never
    /// retry with the same input.
    #[display("invalid path: {_0}")]
    InvalidPath(#[error(not(source))] String),
    /// The directory to be packed does not exist or is not a directory.
    #[display("source directory not found: {}", _0.display())]
    SourceNotFound(#[error(not(source))] PathBuf),
    /// The first archive entry was not the hash index.
    #[display("archive does not start with a hash index")]
    MissingIndex,
    /// The hash index entry could not be encoded or decoded.
    #[display("invalid hash index")]
    InvalidIndex,
    /// The archive contains an entry kind that cannot be materialized.
    #[display("unsupported archive entry: {_0}")]
    UnsupportedEntry(#[error(not(source))] String),
    /// The tar/gzip stream is truncated or corrupt.
    #[display("invalid or corrupted archive")]
    InvalidData,
    /// A file system operation on the given path failed.
    #[display("I/O error: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io(_))
    }
}
