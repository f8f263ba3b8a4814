//! Error types for hotreload-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure reading the settings file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A setting parsed but cannot be used.
    #[error("invalid setting `{key}`: {message}")]
    Invalid { key: &'static str, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
