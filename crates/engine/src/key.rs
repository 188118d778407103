use derive_more::Display;
use exn::ResultExt;
use modcache_archive::error::ErrorKind as ArchiveErrorKind;
use modcache_archive::{sha256_reader, sha256_str};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Identifies one install's cacheable output:
/// `<platform>-<sha256(lockfile)>[-<sha256(pre-cache command)>]`.
///
/// A pure function of its inputs, so it is stable across runs and machines
/// that share a platform.
#[derive(Clone, Debug, Display, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(platform: &str, lockfile: impl Read, precache: Option<&str>) -> io::Result<Self> {
        let lockfile_digest = sha256_reader(lockfile)?;
        Ok(match precache {
            Some(command) => Self(format!("{platform}-{lockfile_digest}-{}", sha256_str(command)?)),
            None => Self(format!("{platform}-{lockfile_digest}")),
        })
    }

    pub fn from_lockfile(
        platform: &str,
        lockfile: &Path,
        precache: Option<&str>,
    ) -> modcache_archive::error::Result<Self> {
        let io_error = || ArchiveErrorKind::Io(lockfile.to_path_buf());
        let file = File::open(lockfile).or_raise(io_error)?;
        Self::derive(platform, file, precache).or_raise(io_error)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
