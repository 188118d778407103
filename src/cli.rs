//! Command-line arguments.
//!
//! Every setting can also come from `modcache.toml` or a `MODCACHE_*`
//! environment variable; flags given here take precedence over both.

use clap::{Parser, ValueEnum};
use modcache_config::{LocalOverrides, LogLevel, Overrides, S3Overrides};
use std::path::PathBuf;

/// Restore `node_modules` from a cache keyed on the lockfile, or install it
/// and populate every configured cache.
#[derive(Parser, Debug)]
#[command(name = "modcache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (default: modcache.toml in the working directory)
    #[arg(short, long, env = "MODCACHE_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub log_level: Option<Level>,

    /// Reinstall and re-populate every cache even on a hit
    #[arg(short, long)]
    pub force: bool,

    /// Shell command to run after installing, before the tree is cached
    #[arg(long)]
    pub precache: Option<String>,

    /// Where the archive is staged before it is stored
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    #[arg(long)]
    pub lockfile: Option<PathBuf>,

    #[arg(long)]
    pub modules_dir: Option<PathBuf>,

    /// Install production dependencies only (default: NODE_ENV=production)
    #[arg(long, overrides_with = "no_production")]
    pub production: bool,
    #[arg(long, overrides_with = "production", hide = true)]
    pub no_production: bool,

    /// Use the local directory cache
    #[arg(long, overrides_with = "no_local")]
    pub local: bool,
    #[arg(long, overrides_with = "local", hide = true)]
    pub no_local: bool,

    #[arg(long)]
    pub local_dir: Option<PathBuf>,

    /// Use an S3-compatible cache
    #[arg(long, overrides_with = "no_s3")]
    pub s3: bool,
    #[arg(long, overrides_with = "s3", hide = true)]
    pub no_s3: bool,

    /// `host:port` or a full URL
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    #[arg(long)]
    pub s3_region: Option<String>,

    #[arg(long)]
    pub s3_bucket: Option<String>,

    #[arg(long)]
    pub s3_key_id: Option<String>,

    #[arg(long)]
    pub s3_key_secret: Option<String>,

    /// Connect to the S3 endpoint over TLS
    #[arg(long, overrides_with = "no_s3_tls")]
    pub s3_tls: bool,
    #[arg(long, overrides_with = "s3_tls", hide = true)]
    pub no_s3_tls: bool,

    /// Skip certificate verification for the S3 endpoint
    #[arg(long)]
    pub s3_tls_insecure: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Level {
    Info,
    Debug,
    Trace,
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Info => LogLevel::Info,
            Level::Debug => LogLevel::Debug,
            Level::Trace => LogLevel::Trace,
        }
    }
}

/// `Some` only when one side of a `--flag/--no-flag` pair was given.
fn toggle(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl Cli {
    /// Flags that were actually given, as the top configuration layer.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            log_level: self.log_level.map(LogLevel::from),
            force: self.force.then_some(true),
            precache: self.precache.clone(),
            temp_dir: self.temp_dir.clone(),
            lockfile: self.lockfile.clone(),
            modules_dir: self.modules_dir.clone(),
            production: toggle(self.production, self.no_production),
            local: LocalOverrides {
                enabled: toggle(self.local, self.no_local),
                dir: self.local_dir.clone(),
            },
            s3: S3Overrides {
                enabled: toggle(self.s3, self.no_s3),
                endpoint: self.s3_endpoint.clone(),
                region: self.s3_region.clone(),
                bucket: self.s3_bucket.clone(),
                key_id: self.s3_key_id.clone(),
                key_secret: self.s3_key_secret.clone(),
                tls: toggle(self.s3_tls, self.no_s3_tls),
                tls_insecure: self.s3_tls_insecure.then_some(true),
            },
        }
    }
}
