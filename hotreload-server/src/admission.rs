//! `POST /admin/hot-reload` admission.
//!
//! Gates, in order, each a hard stop:
//!
//! 1. capability: the principal must be an admin;
//! 2. policy: hot reload must be enabled unless this is a test run;
//! 3. integrity: the MD5 of the body must equal the declared digest;
//! 4. exclusivity: no other admission or supervisor may hold the slot;
//! 5. staging: the bytes replace the single staging slot;
//! 6. structure: the staged package must decode completely.
//!
//! Only after all of them is a session log created and a supervisor spawned.
//! A rejection never touches the managed tree, never creates a session log,
//! and leaves this server running.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use chrono::Utc;
use fs2::FileExt;

use hotreload_core::paths::{
    last_session_path, logs_dir, session_log_path, staged_package_path, staging_lock_path,
};
use hotreload_core::{HotReloadResponse, Principal};
use hotreload_package::{
    decode_bounded, stage_bytes, verify_digest, DeploymentPackage, PackageError,
};
use hotreload_supervisor::retention::prune_session_logs;
use hotreload_supervisor::SessionLog;

use crate::auth::require_admin;
use crate::error::AdmissionError;
use crate::launcher::LaunchRequest;
use crate::state::AppState;

/// One admission attempt.
#[derive(Debug, Clone)]
pub struct HotReloadRequest {
    pub package_bytes: Bytes,
    pub declared_digest: Option<String>,
    pub test_mode: bool,
    pub principal: Principal,
}

/// Run every gate and, if all pass, hand off to a relaunch supervisor.
pub async fn admit(
    state: &AppState,
    request: HotReloadRequest,
) -> Result<HotReloadResponse, AdmissionError> {
    let settings = state.settings.as_ref();

    require_admin(&request.principal)?;

    if !settings.hot_reload.enabled && !request.test_mode {
        return Err(AdmissionError::Policy);
    }

    let declared = request
        .declared_digest
        .as_deref()
        .map(str::trim)
        .filter(|digest| !digest.is_empty())
        .ok_or(AdmissionError::MissingDigest)?;
    let digest =
        verify_digest(&request.package_bytes, declared).map_err(AdmissionError::Integrity)?;

    let _admission = state
        .admission
        .try_lock()
        .map_err(|_| AdmissionError::Busy)?;
    if state.is_handing_off() {
        return Err(AdmissionError::Busy);
    }
    let state_dir = settings.state_dir();
    let _staging_lock = lock_staging_slot(&staging_lock_path(&state_dir))?;

    let staged = staged_package_path(&state_dir);
    stage_bytes(&staged, &request.package_bytes)
        .map_err(|e| AdmissionError::Staging(e.to_string()))?;
    let package = match decode_staged(&staged, settings.hot_reload.max_uncompressed_bytes()) {
        Ok(package) => package,
        Err(err) => {
            let _ = fs::remove_file(&staged);
            return Err(err);
        }
    };

    let logs = logs_dir(&state_dir);
    if let Err(err) = prune_session_logs(&logs, settings.hot_reload.retained_session_logs) {
        tracing::warn!(dir = %logs.display(), error = %err, "session log pruning failed");
    }
    let log_path = session_log_path(&state_dir, Utc::now());
    let log = SessionLog::create(
        &log_path,
        &format!(
            "hot reload admitted: {} files, digest {digest}, principal {}, test mode: {}",
            package.file_count(),
            request.principal.name,
            request.test_mode
        ),
    )
    .map_err(|e| AdmissionError::Staging(e.to_string()))?;
    record_last_session(&last_session_path(&state_dir), &log_path)
        .map_err(|e| AdmissionError::Staging(e.to_string()))?;

    let launch = LaunchRequest {
        package: &staged,
        digest: digest.as_str(),
        log: &log_path,
        test_mode: request.test_mode,
    };
    match state.launcher.launch(settings, &launch) {
        Ok(pid) => log.info(format!("relaunch supervisor started with pid {pid}")),
        Err(err) => {
            log.error(format!("could not start relaunch supervisor: {err}"));
            return Err(AdmissionError::Spawn(err));
        }
    }

    state.begin_handoff();
    log.info("server shutting down for relaunch");
    tracing::info!(
        files = package.file_count(),
        digest = %digest,
        log = %log_path.display(),
        "hot reload admitted; handing off"
    );

    Ok(HotReloadResponse::admitted(
        log_path.display().to_string(),
        package.file_count(),
    ))
}

/// Path of the most recent session log, if any session has been admitted.
pub fn last_session_log(state_dir: &Path) -> Option<PathBuf> {
    fs::read_to_string(last_session_path(state_dir))
        .ok()
        .map(|contents| PathBuf::from(contents.trim()))
        .filter(|path| !path.as_os_str().is_empty())
}

fn lock_staging_slot(path: &Path) -> Result<File, AdmissionError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| AdmissionError::Staging(format!("{}: {e}", dir.display())))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| AdmissionError::Staging(format!("{}: {e}", path.display())))?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(err) if is_contended(&err) => {
            tracing::info!(lock = %path.display(), "staging slot held by another session");
            Err(AdmissionError::Busy)
        }
        Err(err) => Err(AdmissionError::Staging(err.to_string())),
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn decode_staged(staged: &Path, max_uncompressed: u64) -> Result<DeploymentPackage, AdmissionError> {
    let bytes = fs::read(staged)
        .map_err(|e| AdmissionError::Staging(format!("{}: {e}", staged.display())))?;
    decode_bounded(&bytes, max_uncompressed).map_err(|err| match err {
        PackageError::Io { .. } => AdmissionError::Staging(err.to_string()),
        other => AdmissionError::PackageCorrupt(other),
    })
}

fn record_last_session(record: &Path, log_path: &Path) -> std::io::Result<()> {
    if let Some(dir) = record.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = record.with_extension("tmp");
    fs::write(&tmp, format!("{}\n", log_path.display()))?;
    fs::rename(&tmp, record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn last_session_round_trip() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(last_session_log(tmp.path()), None);

        let log = tmp.path().join("logs/hot-reload-1.log");
        record_last_session(&last_session_path(tmp.path()), &log).unwrap();
        assert_eq!(last_session_log(tmp.path()), Some(log));
    }

    #[test]
    fn staging_slot_lock_is_exclusive() {
        let tmp = TempDir::new().unwrap();
        let path = staging_lock_path(tmp.path());
        let held = lock_staging_slot(&path).unwrap();
        assert!(matches!(lock_staging_slot(&path), Err(AdmissionError::Busy)));
        drop(held);
        assert!(lock_staging_slot(&path).is_ok());
    }
}
