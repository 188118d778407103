//! Errors raised by cache backends.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Why a backend call failed, phrased so the orchestrator can decide whether
/// to report the run as misconfigured or as a transient failure.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No cache entry stored under this key.
    #[display("cache entry not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The cache directory or an entry in it is not accessible.
    #[display("permission denied on {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    #[display("cache I/O failed: {_0}")]
    Io(IoError),
    /// The object store could not be reached or rejected the request.
    #[display("object store request failed: {_0}")]
    Network(#[error(not(source))] String),
    /// Key is not a single flat file name.
    #[display("invalid cache key: {_0:?}")]
    InvalidKey(#[error(not(source))] String),
    /// Backend root is missing, relative, or not a directory.
    #[display("invalid cache directory: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Backend could not be set up from the given settings.
    #[display("invalid backend configuration: {_0}")]
    Configuration(#[error(not(source))] String),
    /// The object store answered in a way the backend cannot handle.
    #[display("unexpected object store response: {_0}")]
    Backend(#[error(not(source))] String),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::Backend(_))
    }
}
