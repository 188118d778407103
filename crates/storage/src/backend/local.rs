//! Local filesystem cache backend.
//!
//! Entries are flat files inside one configured directory, named by their
//! cache key.

use crate::backend::{BoxSyncRead, Cacher};
use crate::error::{ErrorKind, Result};
use crate::key::validate as validate_key;
use async_trait::async_trait;
use exn::ResultExt;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;

/// Local filesystem cache backend.
///
/// # Examples
///
/// ```no_run
/// use modcache_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("local", "/var/cache/modcache")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct LocalBackend {
    name: String,
    /// Directory holding one file per cache key.
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPath`](ErrorKind::InvalidPath) if `root` is not
    /// absolute, does not exist, or is not a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        // Use non-async here; it only happens once at startup and it's not
        // worth the hassle of making the constructor async.
        if !root.is_absolute() || !root.is_dir() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        Ok(Self { name: name.into(), root })
    }

    /// Absolute location of the entry stored under `key`.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_key(key)?))
    }

    fn map_io_error(e: io::Error, key: &str, path: &Path) -> ErrorKind {
        match e.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound(key.to_string()),
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }
}

#[async_trait]
impl Cacher for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(exn::Exn::from(Self::map_io_error(e, key, &path))),
        }
    }

    async fn get(&self, key: &str) -> Result<BoxSyncRead> {
        let path = self.path_for(key)?;
        let file = fs::File::open(&path).await.map_err(|e| Self::map_io_error(e, key, &path))?;
        Ok(Box::new(file.into_std().await))
    }

    async fn put(&self, key: &str, mut reader: BoxSyncRead) -> Result<()> {
        let path = self.path_for(key)?;
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            // Stage next to the destination so the final rename stays on one
            // file system and is atomic.
            let mut staged = NamedTempFile::new_in(&root).map_err(|e| Self::map_io_error(e, &key, &root))?;
            io::copy(&mut reader, &mut staged).map_err(ErrorKind::Io)?;
            staged.as_file().sync_all().map_err(ErrorKind::Io)?;
            staged.persist(&path).map_err(|e| Self::map_io_error(e.error, &key, &path))?;
            tracing::debug!(path = %path.display(), "stored cache entry");
            Ok(())
        })
        .await
        .or_raise(|| ErrorKind::Backend("local put task failed".to_string()))?
    }
}
