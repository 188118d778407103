//! Cache backend trait and implementations.
//!
//! This module defines the [`Cacher`] trait, a uniform `has/get/put` interface
//! over the stores that hold cache archives (local filesystem, S3-compatible
//! services), and the [`Backend`] enum that the orchestrator holds a list of.

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::{MockBackend, MockFailure};
#[cfg(feature = "s3")]
pub use self::s3::{S3Backend, Tls};
use crate::error::Result;
use async_trait::async_trait;
use std::io::Read;
#[cfg(feature = "mock")]
use std::sync::Arc;

/// Blocking reader handed across the async boundary, suitable for use inside
/// [`spawn_blocking`](tokio::task::spawn_blocking).
pub type BoxSyncRead = Box<dyn Read + Send + 'static>;

/// Uniform interface over cache stores.
///
/// Keys are flat names (see [`validate_key`](crate::validate_key)); every
/// implementation validates them before use.
///
/// # Examples
///
/// ```
/// use modcache_storage::{Cacher, error::Result};
///
/// async fn copy_entry(from: &dyn Cacher, to: &dyn Cacher, key: &str) -> Result<bool> {
///     if !from.has(key).await? {
///         return Ok(false);
///     }
///     let reader = from.get(key).await?;
///     to.put(key, reader).await?;
///     Ok(true)
/// }
/// ```
#[async_trait]
pub trait Cacher: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// Check whether an entry exists under `key`.
    async fn has(&self, key: &str) -> Result<bool>;

    /// Open the entry stored under `key` for streaming reads.
    ///
    /// The async setup (opening the file/request) happens before returning;
    /// the reader itself blocks. Returns
    /// [`NotFound`](crate::error::ErrorKind::NotFound) if there is no entry.
    async fn get(&self, key: &str) -> Result<BoxSyncRead>;

    /// Store everything `reader` yields under `key`, replacing any existing
    /// entry. A failed put never leaves a truncated entry readable.
    async fn put(&self, key: &str, reader: BoxSyncRead) -> Result<()>;
}

/// Every available backend, in a closed set.
pub enum Backend {
    Local(LocalBackend),
    #[cfg(feature = "s3")]
    S3(S3Backend),
    #[cfg(feature = "mock")]
    Mock(Arc<MockBackend>),
}

impl Backend {
    fn inner(&self) -> &dyn Cacher {
        match self {
            Self::Local(backend) => backend,
            #[cfg(feature = "s3")]
            Self::S3(backend) => backend,
            #[cfg(feature = "mock")]
            Self::Mock(backend) => backend.as_ref(),
        }
    }
}

#[async_trait]
impl Cacher for Backend {
    fn name(&self) -> &str {
        self.inner().name()
    }

    async fn has(&self, key: &str) -> Result<bool> {
        self.inner().has(key).await
    }

    async fn get(&self, key: &str) -> Result<BoxSyncRead> {
        self.inner().get(key).await
    }

    async fn put(&self, key: &str, reader: BoxSyncRead) -> Result<()> {
        self.inner().put(key, reader).await
    }
}

impl From<LocalBackend> for Backend {
    fn from(backend: LocalBackend) -> Self {
        Self::Local(backend)
    }
}

#[cfg(feature = "s3")]
impl From<S3Backend> for Backend {
    fn from(backend: S3Backend) -> Self {
        Self::S3(backend)
    }
}

#[cfg(feature = "mock")]
impl From<Arc<MockBackend>> for Backend {
    fn from(backend: Arc<MockBackend>) -> Self {
        Self::Mock(backend)
    }
}
