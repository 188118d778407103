//! Running the package manager that produces the cached tree.
//!
//! The orchestrator only sees the [`Installer`] trait; [`NpmInstaller`] is the
//! implementation the command-line tool wires in.

pub mod error;
mod npm;

pub use crate::npm::NpmInstaller;
use crate::error::Result;

/// Captured, trimmed output of a finished command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
}

/// Produces the dependency tree in the working directory.
///
/// Both methods block until the command has finished. A non-zero exit is an
/// error carrying the command's stderr.
pub trait Installer: Send + Sync {
    /// Install dependencies from the lockfile.
    fn run(&self) -> Result<Output>;

    /// Run a shell command line after installing, before the tree is packed.
    fn run_precache_command(&self, command_line: &str) -> Result<Output>;
}
