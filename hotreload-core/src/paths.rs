//! State directory layout.
//!
//! ```text
//! <state_dir>/
//!   staging/package.zip        single staging slot
//!   staging/package.lock       cross-process lock guarding the slot
//!   run/server.pid             process identity of the serving process
//!   run/last-session           path of the most recent session log
//!   logs/hot-reload-*.log      one per relaunch session
//!   logs/server-output.log     stdout/stderr of detached servers
//!   logs/relaunch-output.log   stdout/stderr of relaunch supervisors
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

pub const STAGED_PACKAGE: &str = "package.zip";
pub const STAGING_LOCK: &str = "package.lock";
pub const SERVER_PID: &str = "server.pid";
pub const LAST_SESSION: &str = "last-session";
pub const SESSION_LOG_PREFIX: &str = "hot-reload-";
pub const SERVER_OUTPUT_LOG: &str = "server-output.log";
pub const RELAUNCH_OUTPUT_LOG: &str = "relaunch-output.log";

/// Route served by both the application server and the diagnostic listener.
pub const DIAGNOSTIC_STATUS_ROUTE: &str = "/api/admin/hot-reload-status";
/// Authenticated status route on the application server.
pub const STATUS_ROUTE: &str = "/admin/hot-reload-status";
/// Admission route.
pub const HOT_RELOAD_ROUTE: &str = "/admin/hot-reload";
/// Health probe; answers `pong`.
pub const PING_ROUTE: &str = "/api/ping";
pub const VERSION_ROUTE: &str = "/api/version";
/// Request header carrying the declared package digest.
pub const DIGEST_HEADER: &str = "X-Content-MD5";

pub fn staging_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("staging")
}

pub fn staged_package_path(state_dir: &Path) -> PathBuf {
    staging_dir(state_dir).join(STAGED_PACKAGE)
}

pub fn staging_lock_path(state_dir: &Path) -> PathBuf {
    staging_dir(state_dir).join(STAGING_LOCK)
}

pub fn run_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("run")
}

pub fn pid_file_path(state_dir: &Path) -> PathBuf {
    run_dir(state_dir).join(SERVER_PID)
}

pub fn last_session_path(state_dir: &Path) -> PathBuf {
    run_dir(state_dir).join(LAST_SESSION)
}

pub fn logs_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("logs")
}

pub fn server_output_log_path(state_dir: &Path) -> PathBuf {
    logs_dir(state_dir).join(SERVER_OUTPUT_LOG)
}

pub fn relaunch_output_log_path(state_dir: &Path) -> PathBuf {
    logs_dir(state_dir).join(RELAUNCH_OUTPUT_LOG)
}

/// Fresh session log path for a session admitted at `at`.
///
/// Millisecond resolution keeps names unique across back-to-back admissions
/// and makes lexical order match chronological order.
pub fn session_log_path(state_dir: &Path, at: DateTime<Utc>) -> PathBuf {
    logs_dir(state_dir).join(format!(
        "{SESSION_LOG_PREFIX}{}.log",
        at.format("%Y%m%dT%H%M%S%.3fZ")
    ))
}

/// Whether `path` names a session log (as opposed to process output logs).
pub fn is_session_log(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(SESSION_LOG_PREFIX) && name.ends_with(".log"))
        .unwrap_or(false)
}
