//! modcache: restore or install `node_modules` through a lockfile-keyed cache.

mod cli;
mod error;

use crate::cli::Cli;
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use modcache_archive::PathPolicy;
use modcache_config::{Config, LogLevel};
use modcache_engine::{Orchestrator, Report, Settings};
use modcache_installer::NpmInstaller;
use modcache_storage::Backend;
use modcache_storage::backend::{LocalBackend, S3Backend, Tls};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: cannot start the async runtime: {err}");
            return ExitCode::FAILURE;
        },
    };
    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let working_dir = std::env::current_dir().or_raise(|| ErrorKind::WorkingDir)?;
    let config =
        modcache_config::load(cli.config.as_deref(), &working_dir, &cli.overrides()).or_raise(|| ErrorKind::Config)?;
    init_tracing(config.log_level);
    debug!(
        log_level = %config.log_level,
        local = config.local.enabled,
        s3 = config.s3.enabled,
        "configuration loaded"
    );

    let production = config.production(std::env::var("NODE_ENV").ok().as_deref());
    let backends = backends(&config).await?;
    if backends.is_empty() {
        warn!("no cache backend enabled; dependencies will always be installed");
    }
    let installer = NpmInstaller::discover(&working_dir, production).or_raise(|| ErrorKind::Installer)?;
    let platform = installer.platform().or_raise(|| ErrorKind::Platform)?;
    info!(platform = %platform, production, backends = backends.len(), "starting");

    let temp_dir = absolute_dir(&config.temp_dir).or_raise(|| ErrorKind::Config)?;
    let settings = Settings {
        working_dir,
        lockfile: config.lockfile.clone(),
        modules_dir: config.modules_dir.clone(),
        temp_dir,
        platform,
        precache: config.precache_command().map(str::to_string),
        force: config.force,
        policy: PathPolicy::STRICT,
    };
    let report = Orchestrator::new(settings, backends, Arc::new(installer))
        .run()
        .await
        .or_raise(|| ErrorKind::Run)?;
    log_report(&report);
    Ok(())
}

/// `RUST_LOG` wins over the configured level when set.
fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Enabled backends in lookup order: local first, then S3.
async fn backends(config: &Config) -> Result<Vec<Backend>> {
    let mut backends = Vec::new();
    if config.local.enabled {
        // Unlike the staging directory, a missing cache directory is a configuration error.
        let dir = std::path::absolute(&config.local.dir).or_raise(|| ErrorKind::Backend("local".to_string()))?;
        let local = LocalBackend::new("local", dir).or_raise(|| ErrorKind::Backend("local".to_string()))?;
        backends.push(local.into());
    }
    if config.s3.enabled {
        let s3 = &config.s3;
        let tls = match (s3.tls, s3.tls_insecure) {
            (false, _) => Tls::Disabled,
            (true, false) => Tls::Verified,
            (true, true) => Tls::Insecure,
        };
        if !s3.tls && s3.tls_insecure {
            warn!("s3.tls_insecure has no effect while s3.tls is off");
        }
        let backend = S3Backend::new(
            "s3",
            s3.bucket.clone().unwrap_or_default(),
            s3.region.clone(),
            s3.endpoint.as_deref().unwrap_or_default(),
            tls,
            s3.key_id.clone().unwrap_or_default(),
            s3.key_secret.clone().unwrap_or_default(),
        )
        .await
        .or_raise(|| ErrorKind::Backend("s3".to_string()))?;
        backends.push(backend.into());
    }
    Ok(backends)
}

/// Creates `dir` if needed and returns it as an absolute path.
fn absolute_dir(dir: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    std::path::absolute(dir)
}

fn log_report(report: &Report) {
    for warning in &report.warnings {
        warn!("{warning}");
    }
    info!(
        key = %report.key,
        outcome = %report.outcome,
        source = report.source.as_deref().unwrap_or("none"),
        installed = report.installed,
        written = report.written,
        skipped = report.skipped,
        removed = report.removed.len(),
        stored = report.stored.len(),
        "done"
    );
}
