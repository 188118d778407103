use modcache_archive::PathPolicy;
use modcache_engine::error::ErrorKind;
use modcache_engine::{CacheKey, Orchestrator, Outcome, Settings};
use modcache_installer::error::{ErrorKind as InstallerErrorKind, Result as InstallerResult};
use modcache_installer::{Installer, Output};
use modcache_storage::Backend;
use modcache_storage::backend::{LocalBackend, MockBackend, MockFailure};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

const PLATFORM: &str = "v20.11.0-linux-x64-dev";
const LOCKFILE: &str = r#"{"name": "app", "lockfileVersion": 3, "packages": {}}"#;
const MODULES: &[(&str, &str)] = &[
    ("node_modules/left-pad/index.js", "module.exports = (s) => s;\n"),
    ("node_modules/left-pad/package.json", r#"{"name": "left-pad"}"#),
    ("node_modules/tool/cli.js", "#!/usr/bin/env node\n"),
];

/// Stands in for `npm ci`: writes a fixed tree into the working directory.
struct ScriptedInstaller {
    working_dir: PathBuf,
    files: &'static [(&'static str, &'static str)],
    runs: AtomicUsize,
    precache_runs: AtomicUsize,
    fail: bool,
}

impl ScriptedInstaller {
    fn new(working_dir: &Path) -> Self {
        Self {
            working_dir: working_dir.to_path_buf(),
            files: MODULES,
            runs: AtomicUsize::new(0),
            precache_runs: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// Succeeds without producing a modules directory.
    fn empty(working_dir: &Path) -> Self {
        Self { files: &[], ..Self::new(working_dir) }
    }

    fn failing(working_dir: &Path) -> Self {
        Self { fail: true, ..Self::new(working_dir) }
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Installer for ScriptedInstaller {
    fn run(&self) -> InstallerResult<Output> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            exn::bail!(InstallerErrorKind::Failed {
                command: "npm ci".to_string(),
                code: Some(1),
                stderr: "npm ERR! code ERESOLVE".to_string(),
            });
        }
        for (path, contents) in self.files {
            let path = self.working_dir.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
        #[cfg(unix)]
        if !self.files.is_empty() {
            let bin = self.working_dir.join("node_modules/.bin");
            fs::create_dir_all(&bin).unwrap();
            let link = bin.join("tool");
            if fs::symlink_metadata(&link).is_err() {
                std::os::unix::fs::symlink("../tool/cli.js", link).unwrap();
            }
        }
        Ok(Output { stdout: "added 2 packages".to_string(), stderr: String::new() })
    }

    fn run_precache_command(&self, command_line: &str) -> InstallerResult<Output> {
        self.precache_runs.fetch_add(1, Ordering::SeqCst);
        fs::write(self.working_dir.join("node_modules/.precache"), command_line).unwrap();
        Ok(Output::default())
    }
}

/// A project directory holding a lockfile, and a separate staging directory.
struct Project {
    dir: TempDir,
    staging: TempDir,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package-lock.json"), LOCKFILE).unwrap();
        Self { dir, staging: tempfile::tempdir().unwrap() }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn settings(&self) -> Settings {
        Settings {
            working_dir: self.path().to_path_buf(),
            lockfile: PathBuf::from("package-lock.json"),
            modules_dir: PathBuf::from("node_modules"),
            temp_dir: self.staging.path().to_path_buf(),
            platform: PLATFORM.to_string(),
            precache: None,
            force: false,
            policy: PathPolicy::STRICT,
        }
    }

    fn assert_modules_installed(&self) {
        for (path, contents) in MODULES {
            assert_eq!(fs::read_to_string(self.path().join(path)).unwrap(), *contents, "{path}");
        }
        #[cfg(unix)]
        assert_eq!(
            fs::read_link(self.path().join("node_modules/.bin/tool")).unwrap(),
            PathBuf::from("../tool/cli.js")
        );
    }

    fn assert_staging_empty(&self) {
        assert_eq!(fs::read_dir(self.staging.path()).unwrap().count(), 0);
    }
}

fn mock(name: &str) -> Arc<MockBackend> {
    Arc::new(MockBackend::default().with_name(name))
}

/// Runs a cold install into a throwaway project and returns the stored archive.
async fn populated_archive() -> (CacheKey, Vec<u8>) {
    let project = Project::new();
    let backend = mock("seed");
    let installer = Arc::new(ScriptedInstaller::new(project.path()));
    let report = Orchestrator::new(project.settings(), vec![Backend::from(Arc::clone(&backend))], installer)
        .run()
        .await
        .unwrap();
    let archive = backend.entry(report.key.as_str()).await.unwrap();
    (report.key, archive)
}

#[tokio::test]
async fn cold_miss_populates_every_backend() {
    let project = Project::new();
    let first = mock("first");
    let second = mock("second");
    let installer = Arc::new(ScriptedInstaller::new(project.path()));
    let orchestrator = Orchestrator::new(
        project.settings(),
        vec![Backend::from(Arc::clone(&first)), Backend::from(Arc::clone(&second))],
        installer.clone(),
    );

    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.outcome, Outcome::Miss);
    assert_eq!(report.source, None);
    assert!(report.installed);
    assert_eq!(installer.runs(), 1);
    assert_eq!(report.stored, ["first", "second"]);
    assert_eq!(first.put_count(), 1);
    assert_eq!(second.put_count(), 1);
    let stored = first.entry(report.key.as_str()).await.unwrap();
    assert!(!stored.is_empty());
    assert_eq!(Some(stored), second.entry(report.key.as_str()).await);
    project.assert_staging_empty();
}

#[tokio::test]
async fn local_hit_restores_without_installing() {
    let cache = tempfile::tempdir().unwrap();

    let seed = Project::new();
    let local = LocalBackend::new("local", cache.path()).unwrap();
    Orchestrator::new(seed.settings(), vec![local.into()], Arc::new(ScriptedInstaller::new(seed.path())))
        .run()
        .await
        .unwrap();

    let project = Project::new();
    let remote = mock("remote");
    let installer = Arc::new(ScriptedInstaller::new(project.path()));
    let local = LocalBackend::new("local", cache.path()).unwrap();
    let orchestrator = Orchestrator::new(
        project.settings(),
        vec![local.into(), Backend::from(Arc::clone(&remote))],
        installer.clone(),
    );

    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.outcome, Outcome::HitApplied);
    assert_eq!(report.source.as_deref(), Some("local"));
    assert!(!report.installed);
    assert_eq!(installer.runs(), 0);
    assert_eq!(report.written, MODULES.len());
    assert!(report.stored.is_empty());
    assert_eq!(remote.get_count(), 0);
    assert_eq!(remote.put_count(), 0);
    project.assert_modules_installed();
}

#[tokio::test]
async fn hit_removes_stale_files_and_skips_unchanged() {
    let (key, archive) = populated_archive().await;
    let project = Project::new();
    let stale = project.path().join("node_modules/left-pad/old.js");
    fs::create_dir_all(stale.parent().unwrap()).unwrap();
    fs::write(&stale, "stale").unwrap();
    let (unchanged, contents) = MODULES[0];
    fs::write(project.path().join(unchanged), contents).unwrap();

    let backend = Arc::new(MockBackend::with_entries([(key.to_string(), archive)]));
    let installer = Arc::new(ScriptedInstaller::new(project.path()));
    let report = Orchestrator::new(project.settings(), vec![Backend::from(backend)], installer.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::HitApplied);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.written, MODULES.len() - 1);
    assert_eq!(report.removed, [PathBuf::from("node_modules/left-pad/old.js")]);
    assert!(!stale.exists());
    assert_eq!(installer.runs(), 0);
    project.assert_modules_installed();
}

#[tokio::test]
async fn first_backend_with_entry_wins() {
    let (key, archive) = populated_archive().await;
    let first = Arc::new(MockBackend::with_entries([(key.to_string(), archive.clone())]).with_name("first"));
    let second = Arc::new(MockBackend::with_entries([(key.to_string(), archive)]).with_name("second"));
    let project = Project::new();
    let orchestrator = Orchestrator::new(
        project.settings(),
        vec![Backend::from(Arc::clone(&first)), Backend::from(Arc::clone(&second))],
        Arc::new(ScriptedInstaller::new(project.path())),
    );

    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.source.as_deref(), Some("first"));
    assert_eq!(first.get_count(), 1);
    assert_eq!(second.get_count(), 0);
}

#[tokio::test]
async fn forced_reinstall_repopulates_every_backend() {
    let cache = tempfile::tempdir().unwrap();
    let project = Project::new();
    let remote = mock("remote");
    let installer = Arc::new(ScriptedInstaller::new(project.path()));
    let backends = || {
        vec![
            Backend::from(LocalBackend::new("local", cache.path()).unwrap()),
            Backend::from(Arc::clone(&remote)),
        ]
    };
    Orchestrator::new(project.settings(), backends(), installer.clone()).run().await.unwrap();
    assert_eq!(remote.put_count(), 1);

    let settings = Settings { force: true, ..project.settings() };
    let report = Orchestrator::new(settings, backends(), installer.clone()).run().await.unwrap();

    assert_eq!(report.outcome, Outcome::HitForcedSkip);
    assert_eq!(report.source.as_deref(), Some("local"));
    assert!(report.installed);
    assert_eq!(installer.runs(), 2);
    assert_eq!(report.stored, ["local", "remote"]);
    assert_eq!(remote.put_count(), 2);
    assert!(cache.path().join(report.key.as_str()).is_file());
    project.assert_staging_empty();
}

#[tokio::test]
async fn precache_command_changes_key_and_is_archived() {
    let project = Project::new();
    let backend = mock("mock");
    let installer = Arc::new(ScriptedInstaller::new(project.path()));
    let settings = Settings { precache: Some("npm run build".to_string()), ..project.settings() };
    let report = Orchestrator::new(settings, vec![Backend::from(Arc::clone(&backend))], installer.clone())
        .run()
        .await
        .unwrap();

    let expected = CacheKey::derive(PLATFORM, LOCKFILE.as_bytes(), Some("npm run build")).unwrap();
    assert_eq!(report.key, expected);
    assert_eq!(installer.precache_runs.load(Ordering::SeqCst), 1);

    let restored = Project::new();
    let settings = Settings { precache: Some("npm run build".to_string()), ..restored.settings() };
    let report = Orchestrator::new(
        settings,
        vec![Backend::from(backend)],
        Arc::new(ScriptedInstaller::new(restored.path())),
    )
    .run()
    .await
    .unwrap();
    assert_eq!(report.outcome, Outcome::HitApplied);
    assert_eq!(fs::read_to_string(restored.path().join("node_modules/.precache")).unwrap(), "npm run build");
}

#[tokio::test]
async fn missing_modules_after_install_is_fatal() {
    let project = Project::new();
    let backend = mock("mock");
    let orchestrator = Orchestrator::new(
        project.settings(),
        vec![Backend::from(Arc::clone(&backend))],
        Arc::new(ScriptedInstaller::empty(project.path())),
    );

    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(&*err, ErrorKind::MissingModules(path) if path.ends_with("node_modules")));
    assert_eq!(backend.put_count(), 0);
}

#[tokio::test]
async fn installer_failure_is_reported_as_install_stage() {
    let project = Project::new();
    let backend = mock("mock");
    let orchestrator = Orchestrator::new(
        project.settings(),
        vec![Backend::from(Arc::clone(&backend))],
        Arc::new(ScriptedInstaller::failing(project.path())),
    );

    let err = orchestrator.run().await.unwrap_err();

    assert_eq!(*err, ErrorKind::Install);
    assert_eq!(backend.put_count(), 0);
}

#[tokio::test]
async fn missing_lockfile_fails_key_derivation() {
    let project = Project::new();
    fs::remove_file(project.path().join("package-lock.json")).unwrap();
    let installer = Arc::new(ScriptedInstaller::new(project.path()));
    let orchestrator = Orchestrator::new(project.settings(), vec![Backend::from(mock("mock"))], installer.clone());

    let err = orchestrator.run().await.unwrap_err();

    assert_eq!(*err, ErrorKind::Key);
    assert_eq!(installer.runs(), 0);
}

#[tokio::test]
async fn failed_store_still_removes_temporary_archive() {
    let project = Project::new();
    let cache = tempfile::tempdir().unwrap();
    let local = LocalBackend::new("local", cache.path()).unwrap();
    // The backend was valid when configured but its directory is gone by the time it is written to.
    drop(cache);
    let remote = mock("remote");
    let orchestrator = Orchestrator::new(
        project.settings(),
        vec![local.into(), Backend::from(Arc::clone(&remote))],
        Arc::new(ScriptedInstaller::new(project.path())),
    );

    let err = orchestrator.run().await.unwrap_err();

    assert_eq!(*err, ErrorKind::Store("local".to_string()));
    assert_eq!(remote.put_count(), 0);
    project.assert_staging_empty();
}

#[tokio::test]
async fn failed_lookup_aborts_before_installing() {
    let project = Project::new();
    let broken = Arc::new(MockBackend::default().with_name("broken").with_failure(MockFailure::Has));
    let later = mock("later");
    let installer = Arc::new(ScriptedInstaller::new(project.path()));
    let orchestrator = Orchestrator::new(
        project.settings(),
        vec![Backend::from(broken), Backend::from(Arc::clone(&later))],
        installer.clone(),
    );

    let err = orchestrator.run().await.unwrap_err();

    assert_eq!(*err, ErrorKind::Lookup("broken".to_string()));
    assert_eq!(installer.runs(), 0);
    assert_eq!(later.put_count(), 0);
    assert!(!project.path().join("node_modules").exists());
}

#[tokio::test]
async fn failed_fetch_aborts_before_installing() {
    let (key, archive) = populated_archive().await;
    let project = Project::new();
    let broken = Arc::new(
        MockBackend::with_entries([(key.to_string(), archive)])
            .with_name("broken")
            .with_failure(MockFailure::Get),
    );
    let installer = Arc::new(ScriptedInstaller::new(project.path()));
    let orchestrator = Orchestrator::new(project.settings(), vec![Backend::from(Arc::clone(&broken))], installer.clone());

    let err = orchestrator.run().await.unwrap_err();

    assert_eq!(*err, ErrorKind::Fetch("broken".to_string()));
    assert_eq!(installer.runs(), 0);
    assert_eq!(broken.put_count(), 0);
    assert!(!project.path().join("node_modules").exists());
}

#[tokio::test]
async fn no_backends_installs_and_stores_nothing() {
    let project = Project::new();
    let installer = Arc::new(ScriptedInstaller::new(project.path()));
    let report = Orchestrator::new(project.settings(), vec![], installer.clone()).run().await.unwrap();

    assert_eq!(report.outcome, Outcome::Miss);
    assert!(report.installed);
    assert!(report.stored.is_empty());
    project.assert_staging_empty();
}
