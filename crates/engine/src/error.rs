//! Orchestration Error Types
//!
//! Every variant names the stage a run failed in. The error from the archive,
//! storage or installer crate that caused it is kept as a child frame.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An orchestration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for orchestration.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories, one per stage of a run.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The lockfile could not be read.
    #[display("failed to derive cache key")]
    Key,
    #[display("failed to query cache backend {_0}")]
    Lookup(#[error(not(source))] String),
    #[display("failed to fetch archive from cache backend {_0}")]
    Fetch(#[error(not(source))] String),
    #[display("failed to extract archive")]
    Extract,
    #[display("failed to remove stale files")]
    Reconcile,
    #[display("dependency install failed")]
    Install,
    /// The installer reported success but produced nothing to cache.
    #[display("install succeeded but {} does not exist", _0.display())]
    MissingModules(#[error(not(source))] PathBuf),
    #[display("pre-cache command failed")]
    Precache,
    #[display("failed to create archive")]
    Pack,
    #[display("failed to store archive in cache backend {_0}")]
    Store(#[error(not(source))] String),
    /// Every backend was populated, but the temporary archive stayed behind.
    #[display("failed to remove temporary archive {}", _0.display())]
    Cleanup(#[error(not(source))] PathBuf),
    /// A blocking stage panicked or was cancelled.
    #[display("background task failed")]
    Task,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Lookup(_) | Self::Fetch(_) | Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::Lookup("s3".to_string()).to_string(), "failed to query cache backend s3");
        assert_eq!(
            ErrorKind::MissingModules(PathBuf::from("/app/node_modules")).to_string(),
            "install succeeded but /app/node_modules does not exist"
        );
        assert_eq!(
            ErrorKind::Cleanup(PathBuf::from("/tmp/modules-key.tar.gz")).to_string(),
            "failed to remove temporary archive /tmp/modules-key.tar.gz"
        );
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Store("local".to_string()).is_retryable());
        assert!(!ErrorKind::Install.is_retryable());
        assert!(!ErrorKind::MissingModules(PathBuf::new()).is_retryable());
    }
}
