//! Log retention for the state directory.
//!
//! Two kinds of files grow without bound if left alone:
//! - session logs, one per admission: only the newest N are kept;
//! - output logs of detached processes: moved to `<name>.1` once they pass
//!   [`MAX_OUTPUT_LOG_BYTES`], replacing the previous backup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hotreload_core::paths::is_session_log;

/// Output logs are rotated past this size (10 MiB).
pub const MAX_OUTPUT_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Delete the oldest session logs under `logs_dir` so that at most `keep`
/// remain once a new one is added. Returns the number removed.
///
/// Session log names embed their UTC creation time, so name order is age
/// order. A missing directory counts as nothing to prune.
pub fn prune_session_logs(logs_dir: &Path, keep: usize) -> io::Result<usize> {
    let entries = match fs::read_dir(logs_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };

    let mut logs: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && is_session_log(&path) {
            logs.push(path);
        }
    }
    logs.sort();

    // Leave room for the log about to be created.
    let excess = logs.len().saturating_sub(keep.saturating_sub(1));
    for path in logs.iter().take(excess) {
        fs::remove_file(path)?;
        tracing::debug!(path = %path.display(), "pruned session log");
    }
    Ok(excess)
}

/// Move `log_path` to `<name>.1` if it is at least `max_bytes` long.
///
/// Returns `true` when a rotation happened.
pub fn rotate_output_log(log_path: &Path, max_bytes: u64) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }

    let name = log_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("output.log");
    fs::rename(log_path, log_path.with_file_name(format!("{name}.1")))?;
    tracing::info!(path = %log_path.display(), "output log rotated");
    Ok(true)
}
