//! Cache key validation.
//!
//! Every backend stores an entry under its key verbatim: a file name in the
//! local directory, an object name in the bucket. Keys must therefore be a
//! single flat path component.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path};

/// Validates a cache key, returning it unchanged when usable.
///
/// # Examples
///
/// ```
/// use modcache_storage::validate_key;
/// assert!(validate_key("v20.11.0-linux-x64-prod-5e88").is_ok());
/// assert!(validate_key("../etc/passwd").is_err());
/// assert!(validate_key("a/b").is_err());
/// assert!(validate_key("").is_err());
/// ```
pub fn validate(key: &str) -> Result<&str> {
    // Null bytes pass through Path::components() on Unix but cause
    // truncation in C-based syscalls.
    if key.contains(['/', '\\', '\0']) {
        exn::bail!(ErrorKind::InvalidKey(key.to_string()));
    }
    let mut components = Path::new(key).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == key => Ok(key),
        _ => exn::bail!(ErrorKind::InvalidKey(key.to_string())),
    }
}
