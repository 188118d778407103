//! Layered configuration for modcache.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults,
//! 2. the user configuration file (`modcache.toml` in the platform config
//!    directory),
//! 3. `modcache.toml` in the working directory, or the file given explicitly,
//! 4. `MODCACHE_*` environment variables, nested keys split on `__`
//!    (`MODCACHE_S3__BUCKET`),
//! 5. command-line [`Overrides`].

pub mod error;
mod model;

pub use crate::model::{Config, LocalConfig, LocalOverrides, LogLevel, Overrides, S3Config, S3Overrides};
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use std::path::{Component, Path, PathBuf};

pub const FILE_NAME: &str = "modcache.toml";
pub const ENV_PREFIX: &str = "MODCACHE_";

/// Loads and validates the configuration.
///
/// An explicit `file` must exist; the implicit ones are skipped when absent.
pub fn load(file: Option<&Path>, working_dir: &Path, overrides: &Overrides) -> Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    match file {
        Some(file) => {
            if !file.is_file() {
                exn::bail!(ErrorKind::Invalid(format!("configuration file not found: {}", file.display())));
            }
            figment = figment.merge(Toml::file_exact(file));
        },
        None => {
            if let Some(user_file) = user_config_file() {
                figment = figment.merge(Toml::file_exact(user_file));
            }
            figment = figment.merge(Toml::file_exact(working_dir.join(FILE_NAME)));
        },
    }
    let config: Config = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .merge(Serialized::defaults(overrides))
        .extract()
        .or_raise(|| ErrorKind::Load)?;
    validate(&config)?;
    Ok(config)
}

/// Platform-specific user configuration file, e.g.
/// `~/.config/modcache/modcache.toml` on Linux.
pub fn user_config_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", "modcache").map(|dirs| dirs.config_dir().join(FILE_NAME))
}

/// Cross-field checks that deserialization alone cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.lockfile.as_os_str().is_empty() {
        exn::bail!(ErrorKind::Invalid("lockfile must not be empty".to_string()));
    }
    if config.modules_dir.as_os_str().is_empty() {
        exn::bail!(ErrorKind::Invalid("modules_dir must not be empty".to_string()));
    }
    if config.modules_dir.is_absolute() || config.modules_dir.components().any(|c| c == Component::ParentDir) {
        exn::bail!(ErrorKind::Invalid("modules_dir must be inside the working directory".to_string()));
    }
    if config.s3.enabled {
        let missing: Vec<&str> = [
            ("s3.endpoint", &config.s3.endpoint),
            ("s3.bucket", &config.s3.bucket),
            ("s3.key_id", &config.s3.key_id),
            ("s3.key_secret", &config.s3.key_secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().is_none_or(str::is_empty))
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            exn::bail!(ErrorKind::Invalid(format!("S3 is enabled but {} not set", missing.join(", "))));
        }
    }
    Ok(())
}
