//! Materialization of a decoded package into the managed tree.
//!
//! ## `write_entry`: per-file protocol
//!
//! 1. Resolve the destination under the tree root.
//! 2. Create parent directories.
//! 3. Write to `<path>.hotreload.tmp`.
//! 4. Rename to the final path (atomic per file on POSIX).
//! 5. Re-read the size and compare with the written length.
//!
//! There is no multi-file transaction: [`materialize`] attempts every entry
//! and reports each outcome, and the caller decides what a failure means.

use std::path::{Path, PathBuf};

use hotreload_core::PackageEntry;

use crate::archive::DeploymentPackage;
use crate::error::{io_err, PackageError};

// ---------------------------------------------------------------------------
// Write result
// ---------------------------------------------------------------------------

/// Outcome of an individual file write.
#[derive(Debug)]
pub enum WriteResult {
    /// File was written and its size verified.
    Written { path: PathBuf, bytes: u64 },
    /// Test mode: the file *would* have been written.
    WouldWrite { path: PathBuf, bytes: u64 },
    /// The write or its verification failed.
    Failed { path: PathBuf, error: PackageError },
}

impl WriteResult {
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written { path, .. }
            | WriteResult::WouldWrite { path, .. }
            | WriteResult::Failed { path, .. } => path,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, WriteResult::Failed { .. })
    }
}

/// Per-entry results of one materialization pass, in package order.
#[derive(Debug, Default)]
pub struct MaterializeReport {
    pub results: Vec<WriteResult>,
}

impl MaterializeReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| !r.is_failure()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_failure()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &WriteResult> {
        self.results.iter().filter(|r| r.is_failure())
    }
}

// ---------------------------------------------------------------------------
// write_entry
// ---------------------------------------------------------------------------

/// Write one entry under `root`, or only report it when `dry_run` is set.
pub fn write_entry(
    root: &Path,
    entry: &PackageEntry,
    dry_run: bool,
) -> Result<WriteResult, PackageError> {
    let path = destination(root, &entry.relative_path)?;
    let tmp = PathBuf::from(format!("{}.hotreload.tmp", path.display()));
    write_entry_with_tmp(&path, entry, dry_run, &tmp)
}

fn write_entry_with_tmp(
    path: &Path,
    entry: &PackageEntry,
    dry_run: bool,
    tmp: &Path,
) -> Result<WriteResult, PackageError> {
    let expected = entry.bytes.len() as u64;

    if dry_run {
        tracing::info!("[test] would write: {} ({} bytes)", path.display(), expected);
        return Ok(WriteResult::WouldWrite {
            path: path.to_path_buf(),
            bytes: expected,
        });
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(tmp, &entry.bytes).map_err(|e| io_err(tmp, e))?;

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    let actual = std::fs::metadata(path).map_err(|e| io_err(path, e))?.len();
    if actual != expected {
        return Err(PackageError::WriteVerification {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }

    tracing::debug!("wrote: {}", path.display());
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
        bytes: actual,
    })
}

fn destination(root: &Path, relative: &str) -> Result<PathBuf, PackageError> {
    let mut path = root.to_path_buf();
    for segment in relative.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(PackageError::UnsafePath(relative.to_string()));
        }
        path.push(segment);
    }
    Ok(path)
}

// ---------------------------------------------------------------------------
// materialize
// ---------------------------------------------------------------------------

/// Write every entry of `package` under `root`.
///
/// A failed entry does not stop the pass; it is recorded as
/// [`WriteResult::Failed`] and the remaining entries are still attempted so the
/// report describes the whole tree.
pub fn materialize(root: &Path, package: &DeploymentPackage, dry_run: bool) -> MaterializeReport {
    let mut report = MaterializeReport::default();
    for entry in package.entries() {
        let result = match write_entry(root, entry, dry_run) {
            Ok(result) => result,
            Err(error) => {
                let path = destination(root, &entry.relative_path)
                    .unwrap_or_else(|_| root.join(&entry.relative_path));
                tracing::error!("write failed: {}: {}", path.display(), error);
                WriteResult::Failed { path, error }
            }
        };
        report.results.push(result);
    }
    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
