use crate::error::{ErrorKind, Result};
use crate::{Installer, Output};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Prints e.g. `v20.11.0-linux-x64`.
const PLATFORM_SCRIPT: &str = r#"process.version + "-" + process.platform + "-" + process.arch"#;

/// Installs with `npm ci` in a fixed working directory.
///
/// Binary locations and production mode are resolved once up front; nothing
/// is read from the environment afterwards.
#[derive(Clone, Debug)]
pub struct NpmInstaller {
    node: PathBuf,
    npm: PathBuf,
    shell: PathBuf,
    working_dir: PathBuf,
    production: bool,
}

impl NpmInstaller {
    pub fn new(
        node: impl Into<PathBuf>,
        npm: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
        production: bool,
    ) -> Self {
        Self {
            node: node.into(),
            npm: npm.into(),
            shell: PathBuf::from("sh"),
            working_dir: working_dir.into(),
            production,
        }
    }

    /// Locates `node` and `npm` on `PATH`.
    pub fn discover(working_dir: impl Into<PathBuf>, production: bool) -> Result<Self> {
        let node = which::which("node").or_raise(|| ErrorKind::NotFound("node".to_string()))?;
        let npm = which::which("npm").or_raise(|| ErrorKind::NotFound("npm".to_string()))?;
        tracing::debug!(node = %node.display(), npm = %npm.display(), "discovered node and npm");
        Ok(Self::new(node, npm, working_dir, production))
    }

    /// Use a specific shell for pre-cache commands instead of `sh`.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Node version, OS and architecture plus the install mode, e.g.
    /// `v20.11.0-linux-x64-prod`.
    pub fn platform(&self) -> Result<String> {
        let mut command = Command::new(&self.node);
        command.args(["-p", PLATFORM_SCRIPT]);
        let output = self.execute(command, "node -p")?;
        let platform = output.stdout;
        if platform.is_empty() || platform.contains(char::is_whitespace) || platform.contains(['/', '\\']) {
            exn::bail!(ErrorKind::Platform(platform));
        }
        let mode = if self.production { "prod" } else { "dev" };
        Ok(format!("{platform}-{mode}"))
    }

    fn execute(&self, mut command: Command, description: &str) -> Result<Output> {
        command.current_dir(&self.working_dir);
        tracing::debug!(command = description, working_dir = %self.working_dir.display(), "running");
        let output = command.output().or_raise(|| ErrorKind::Spawn(description.to_string()))?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            exn::bail!(ErrorKind::Failed {
                command: description.to_string(),
                code: output.status.code(),
                stderr,
            });
        }
        if !stdout.is_empty() {
            tracing::trace!(command = description, stdout = %stdout, "command output");
        }
        Ok(Output { stdout, stderr })
    }
}

impl Installer for NpmInstaller {
    fn run(&self) -> Result<Output> {
        let mode = if self.production { "--production" } else { "--dev" };
        let mut command = Command::new(&self.npm);
        command.args(["ci", mode, "--loglevel", "error", "--progress", "false"]);
        self.execute(command, "npm ci")
    }

    fn run_precache_command(&self, command_line: &str) -> Result<Output> {
        let mut command = Command::new(&self.shell);
        command.args(["-c", command_line]);
        self.execute(command, "pre-cache command")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    /// Writes an executable shell script standing in for a real binary.
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn installer(dir: &Path, production: bool) -> NpmInstaller {
        let node = script(dir, "node", r#"echo "v20.11.0-linux-x64""#);
        let npm = script(dir, "npm", r#"echo "$@"; pwd >&2"#);
        NpmInstaller::new(node, npm, dir, production)
    }

    #[rstest]
    #[case(true, "v20.11.0-linux-x64-prod")]
    #[case(false, "v20.11.0-linux-x64-dev")]
    fn platform_appends_mode(#[case] production: bool, #[case] expected: &str) {
        let temp = tempfile::tempdir().unwrap();
        assert_eq!(installer(temp.path(), production).platform().unwrap(), expected);
    }

    #[test]
    fn garbage_platform_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let node = script(temp.path(), "node", r#"echo "this is not it""#);
        let installer = NpmInstaller::new(node, "npm", temp.path(), false);
        let err = installer.platform().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Platform(_)));
    }

    #[rstest]
    #[case(true, "ci --production --loglevel error --progress false")]
    #[case(false, "ci --dev --loglevel error --progress false")]
    fn run_invokes_npm_ci(#[case] production: bool, #[case] expected: &str) {
        let temp = tempfile::tempdir().unwrap();
        let output = installer(temp.path(), production).run().unwrap();
        assert_eq!(output.stdout, expected);
        // Runs inside the working directory.
        assert_eq!(
            fs::canonicalize(&output.stderr).unwrap(),
            fs::canonicalize(temp.path()).unwrap()
        );
    }

    #[test]
    fn precache_runs_through_the_shell() {
        let temp = tempfile::tempdir().unwrap();
        let output = installer(temp.path(), false)
            .run_precache_command("echo one && echo two > marker")
            .unwrap();
        assert_eq!(output.stdout, "one");
        assert_eq!(fs::read_to_string(temp.path().join("marker")).unwrap(), "two\n");
    }

    #[test]
    fn failures_carry_exit_code_and_stderr() {
        let temp = tempfile::tempdir().unwrap();
        let err = installer(temp.path(), false)
            .run_precache_command("echo broken >&2; exit 3")
            .unwrap_err();
        assert_eq!(
            *err,
            ErrorKind::Failed {
                command: "pre-cache command".to_string(),
                code: Some(3),
                stderr: "broken".to_string(),
            }
        );
    }

    #[test]
    fn missing_binary_cannot_spawn() {
        let temp = tempfile::tempdir().unwrap();
        let installer = NpmInstaller::new(temp.path().join("no-node"), "npm", temp.path(), false);
        let err = installer.platform().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Spawn(_)));
    }
}
