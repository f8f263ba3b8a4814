//! Error types for hotreload-package.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while building, verifying or writing packages.
#[derive(Debug, Error)]
pub enum PackageError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A required manifest/config file or source subtree is absent.
    #[error("required file missing from source tree: {path}")]
    MissingRequired { path: PathBuf },

    /// The digest of the bytes does not match the declared digest.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// The archive failed structural decoding.
    #[error("package is corrupt: {0}")]
    Corrupt(String),

    /// An entry would land outside the managed tree.
    #[error("package entry escapes the target tree: {0}")]
    UnsafePath(String),

    /// Archive encoding failed while building.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A written file did not read back at the expected size.
    #[error("write verification failed at {path}: wrote {expected} bytes, found {actual}")]
    WriteVerification {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

/// Convenience constructor for [`PackageError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> PackageError {
    PackageError::Io {
        path: path.into(),
        source,
    }
}
