//! Installer Error Types

use derive_more::{Display, Error};

/// An installer error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for installer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Executable is not on `PATH`.
    #[display("{_0} not detected on your system")]
    NotFound(#[error(not(source))] String),
    /// The process could not be started at all.
    #[display("failed to start {_0}")]
    Spawn(#[error(not(source))] String),
    /// The process ran and reported failure. A missing exit code means it was
    /// killed by a signal.
    #[display("{command} exited with code {}: {stderr}", code.map_or_else(|| "none".to_string(), |code| code.to_string()))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    /// `node` printed something that is not a platform identifier.
    #[display("unexpected platform identifier: {_0:?}")]
    Platform(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
