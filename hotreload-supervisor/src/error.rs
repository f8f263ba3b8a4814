use std::path::PathBuf;

use thiserror::Error;

use hotreload_core::ConfigError;
use hotreload_package::PackageError;

/// Error surface for a relaunch session.
///
/// Whether a failure is recoverable is decided by the session's
/// app-directory-modified bit, not by the variant.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing required argument --{0}")]
    MissingArgument(&'static str),

    #[error("settings error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid pid file {path}: {contents:?}")]
    PidFile { path: PathBuf, contents: String },

    #[error("server pid {pid} still running after {waited_secs}s")]
    ShutdownTimeout { pid: i32, waited_secs: u64 },

    #[error("staging slot {path} is held by another session")]
    StagingLocked { path: PathBuf },

    #[error("package rejected: {0}")]
    Package(#[from] PackageError),

    #[error("{failed} of {total} file writes failed (first: {first})")]
    Write {
        failed: usize,
        total: usize,
        first: String,
    },

    #[error("dependency install failed: {0}")]
    DependencyInstall(String),

    #[error("build failed: {0}")]
    Build(String),

    #[error("server spawn failed: {0}")]
    Spawn(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SupervisorError {
    SupervisorError::Io {
        path: path.into(),
        source,
    }
}
