use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Startup and run failures of the command-line tool.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    #[display("cannot determine the working directory")]
    WorkingDir,
    #[display("cannot set up the {_0} cache backend")]
    Backend(#[error(not(source))] String),
    #[display("cannot locate node and npm")]
    Installer,
    #[display("cannot detect the node platform")]
    Platform,
    #[display("cache run failed")]
    Run,
}
