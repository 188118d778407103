use crate::error::{ErrorKind, Result};
use crate::key::CacheKey;
use derive_more::Display;
use exn::ResultExt;
use modcache_archive::{Manifest, PathPolicy, pack, reconcile, unpack};
use modcache_installer::Installer;
use modcache_storage::{Backend, BoxSyncRead, Cacher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::spawn_blocking;
use tracing::{debug, info, instrument, warn};

/// Everything a run needs to know about the project, resolved up front.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Extraction root; the lockfile and modules directory live under it.
    pub working_dir: PathBuf,
    /// Lockfile path, relative to `working_dir`.
    pub lockfile: PathBuf,
    /// Modules directory, relative to `working_dir`.
    pub modules_dir: PathBuf,
    /// Where the archive is staged between packing and storing.
    pub temp_dir: PathBuf,
    /// Platform identifier, e.g. `v20.11.0-linux-x64-prod`.
    pub platform: String,
    pub precache: Option<String>,
    /// Reinstall and re-populate every backend even on a hit.
    pub force: bool,
    pub policy: PathPolicy,
}

/// How the cache lookup was resolved.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Outcome {
    /// An archive was found and applied to the working directory.
    #[display("hit")]
    HitApplied,
    /// An archive was found but ignored because the run was forced.
    #[display("hit (forced reinstall)")]
    HitForcedSkip,
    #[display("miss")]
    Miss,
}

/// What a finished run did.
#[derive(Debug)]
pub struct Report {
    pub key: CacheKey,
    pub outcome: Outcome,
    /// Name of the backend that produced the hit.
    pub source: Option<String>,
    pub installed: bool,
    /// Files written and skipped while applying a hit.
    pub written: usize,
    pub skipped: usize,
    /// Stale files removed from the modules directory after applying a hit.
    pub removed: Vec<PathBuf>,
    /// Names of the backends the fresh archive was stored in.
    pub stored: Vec<String>,
    pub warnings: Vec<String>,
}

impl Report {
    fn new(key: CacheKey) -> Self {
        Self {
            key,
            outcome: Outcome::Miss,
            source: None,
            installed: false,
            written: 0,
            skipped: 0,
            removed: vec![],
            stored: vec![],
            warnings: vec![],
        }
    }
}

/// Restores the modules directory from the first backend that has it, or
/// installs it and stores the result in every backend.
pub struct Orchestrator {
    settings: Settings,
    backends: Vec<Backend>,
    installer: Arc<dyn Installer>,
}

impl Orchestrator {
    /// Backends are searched in the order given.
    pub fn new(settings: Settings, backends: Vec<Backend>, installer: Arc<dyn Installer>) -> Self {
        Self { settings, backends, installer }
    }

    #[instrument(skip_all, fields(working_dir = %self.settings.working_dir.display()))]
    pub async fn run(&self) -> Result<Report> {
        let key = self.derive_key().await?;
        info!(key = %key, "derived cache key");
        let mut report = Report::new(key);

        let hit = self.lookup(&report.key).await?;
        if let Some(backend) = hit {
            report.source = Some(backend.name().to_string());
            let reader = backend
                .get(report.key.as_str())
                .await
                .or_raise(|| ErrorKind::Fetch(backend.name().to_string()))?;
            if self.settings.force {
                info!(backend = %backend.name(), "cache hit ignored, reinstalling");
                report.outcome = Outcome::HitForcedSkip;
            } else {
                self.apply(reader, &mut report).await?;
                report.outcome = Outcome::HitApplied;
                info!(
                    backend = %backend.name(),
                    written = report.written,
                    skipped = report.skipped,
                    removed = report.removed.len(),
                    "restored from cache"
                );
            }
        } else {
            info!("cache miss");
        }

        if self.settings.force || hit.is_none() {
            self.install(&mut report).await?;
            self.populate(&mut report).await?;
        }
        Ok(report)
    }

    async fn derive_key(&self) -> Result<CacheKey> {
        let lockfile = self.settings.working_dir.join(&self.settings.lockfile);
        let platform = self.settings.platform.clone();
        let precache = self.settings.precache.clone();
        spawn_blocking(move || CacheKey::from_lockfile(&platform, &lockfile, precache.as_deref()))
            .await
            .or_raise(|| ErrorKind::Task)?
            .or_raise(|| ErrorKind::Key)
    }

    /// First backend, in configured order, that has an entry for `key`.
    async fn lookup(&self, key: &CacheKey) -> Result<Option<&Backend>> {
        for backend in &self.backends {
            let found = backend.has(key.as_str()).await.or_raise(|| ErrorKind::Lookup(backend.name().to_string()))?;
            if found {
                return Ok(Some(backend));
            }
            debug!(backend = %backend.name(), "not found in backend");
        }
        Ok(None)
    }

    /// Extracts the fetched archive, then drops whatever it did not contain.
    async fn apply(&self, reader: BoxSyncRead, report: &mut Report) -> Result<()> {
        let root = self.settings.working_dir.clone();
        let policy = self.settings.policy;
        let unpacked = spawn_blocking(move || unpack(reader, &root, policy))
            .await
            .or_raise(|| ErrorKind::Task)?
            .or_raise(|| ErrorKind::Extract)?;
        report.written = unpacked.written;
        report.skipped = unpacked.skipped;
        report.warnings.extend(unpacked.warnings);

        report.removed = self.reconcile(unpacked.manifest).await?;
        Ok(())
    }

    async fn reconcile(&self, manifest: Manifest) -> Result<Vec<PathBuf>> {
        let root = self.settings.working_dir.clone();
        let modules_dir = self.settings.modules_dir.clone();
        spawn_blocking(move || reconcile(&root, &modules_dir, &manifest))
            .await
            .or_raise(|| ErrorKind::Task)?
            .or_raise(|| ErrorKind::Reconcile)
    }

    /// Runs the installer and the pre-cache command, then checks there is a
    /// modules directory to pack.
    async fn install(&self, report: &mut Report) -> Result<()> {
        let installer = Arc::clone(&self.installer);
        let output = spawn_blocking(move || installer.run())
            .await
            .or_raise(|| ErrorKind::Task)?
            .or_raise(|| ErrorKind::Install)?;
        debug!(stdout = %output.stdout, "installer finished");
        report.installed = true;

        let modules = self.settings.working_dir.join(&self.settings.modules_dir);
        if !tokio::fs::metadata(&modules).await.is_ok_and(|metadata| metadata.is_dir()) {
            exn::bail!(ErrorKind::MissingModules(modules));
        }

        if let Some(command_line) = self.settings.precache.clone() {
            let installer = Arc::clone(&self.installer);
            let output = spawn_blocking(move || installer.run_precache_command(&command_line))
                .await
                .or_raise(|| ErrorKind::Task)?
                .or_raise(|| ErrorKind::Precache)?;
            debug!(stdout = %output.stdout, "pre-cache command finished");
        }
        Ok(())
    }

    /// Packs the modules directory and stores it in every backend. The
    /// temporary archive is removed whether or not storing succeeded.
    async fn populate(&self, report: &mut Report) -> Result<()> {
        let archive = self.settings.temp_dir.join(format!("modules-{}.tar.gz", report.key));
        let destination = archive.clone();
        let root = self.settings.working_dir.clone();
        let modules_dir = self.settings.modules_dir.clone();
        let policy = self.settings.policy;
        let packed = spawn_blocking(move || pack(&destination, &root, &modules_dir, policy))
            .await
            .or_raise(|| ErrorKind::Task)?
            .or_raise(|| ErrorKind::Pack)?;
        debug!(entries = packed.manifest.len(), archive = %archive.display(), "packed modules directory");
        report.warnings.extend(packed.warnings);

        let stored = self.store(&report.key, &archive).await;
        let cleanup = tokio::fs::remove_file(&archive).await;
        report.stored = settle(stored, cleanup, &archive)?;
        info!(backends = report.stored.len(), "stored archive");
        Ok(())
    }

    async fn store(&self, key: &CacheKey, archive: &Path) -> Result<Vec<String>> {
        let mut names = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            let name = backend.name().to_string();
            // Every put streams the archive from the start.
            let file = tokio::fs::File::open(archive).await.or_raise(|| ErrorKind::Store(name.clone()))?;
            let reader: BoxSyncRead = Box::new(file.into_std().await);
            backend.put(key.as_str(), reader).await.or_raise(|| ErrorKind::Store(name.clone()))?;
            debug!(backend = %name, "stored archive in backend");
            names.push(name);
        }
        Ok(names)
    }
}

/// Combines the outcome of storing the archive with that of removing it. A
/// store failure takes precedence; the cleanup failure is then only logged.
fn settle(stored: Result<Vec<String>>, cleanup: io::Result<()>, archive: &Path) -> Result<Vec<String>> {
    match (stored, cleanup) {
        (Ok(names), Ok(())) => Ok(names),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup)) => {
            warn!(archive = %archive.display(), error = %cleanup, "failed to remove temporary archive");
            Err(err)
        },
        (Ok(_), Err(cleanup)) => Err(cleanup).or_raise(|| ErrorKind::Cleanup(archive.to_path_buf())),
    }
}
