use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity of the command-line tool.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    #[display("info")]
    Info,
    #[display("debug")]
    Debug,
    #[display("trace")]
    Trace,
}

/// Fully merged configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: LogLevel,
    /// Reinstall and re-populate every cache even on a hit.
    pub force: bool,
    /// Shell command run after installing, before packing. Part of the key.
    pub precache: Option<String>,
    /// Where the temporary archive is written.
    pub temp_dir: PathBuf,
    /// Relative to the working directory.
    pub lockfile: PathBuf,
    /// Relative to the working directory.
    pub modules_dir: PathBuf,
    /// Install production dependencies only. When unset, derived from
    /// `NODE_ENV` at startup.
    pub production: Option<bool>,
    pub local: LocalConfig,
    pub s3: S3Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            force: false,
            precache: None,
            temp_dir: std::env::temp_dir(),
            lockfile: PathBuf::from("package-lock.json"),
            modules_dir: PathBuf::from("node_modules"),
            production: None,
            local: LocalConfig::default(),
            s3: S3Config::default(),
        }
    }
}

impl Config {
    /// Production mode, falling back to `NODE_ENV == "production"`.
    pub fn production(&self, node_env: Option<&str>) -> bool {
        self.production.unwrap_or(node_env == Some("production"))
    }

    /// The pre-cache command, with blank commands treated as absent.
    pub fn precache_command(&self) -> Option<&str> {
        self.precache.as_deref().map(str::trim).filter(|command| !command.is_empty())
    }
}

/// Cache directory on local disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: std::env::temp_dir(),
        }
    }
}

/// S3-compatible object storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub enabled: bool,
    /// `host:port` or a full URL.
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: Option<String>,
    pub key_id: Option<String>,
    pub key_secret: Option<String>,
    pub tls: bool,
    /// Skip certificate verification.
    pub tls_insecure: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            region: "us-east-1".to_string(),
            bucket: None,
            key_id: None,
            key_secret: None,
            tls: true,
            tls_insecure: false,
        }
    }
}

/// Command-line values layered over every other source. Unset fields leave
/// the lower layers alone.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precache: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lockfile: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modules_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub production: Option<bool>,
    pub local: LocalOverrides,
    pub s3: S3Overrides,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct LocalOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct S3Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_insecure: Option<bool>,
}
