//! Relaunch session state machine.
//!
//! ```text
//! AWAIT_SHUTDOWN ──timeout──────────────────────────────▶ FATAL_NO_SHUTDOWN (exit 1)
//!       │
//!    VALIDATE ──digest/decode error──┐
//!       │                            ├─ tree untouched ─▶ FAILED_SAFELY (old server restarted, exit 1)
//!   DIFF_CHECK ──read error──────────┘
//!       │
//!     WRITE   (app directory modified from here on)
//!       │
//!    INSTALL? ──┐
//!       │       ├─ any failure ─────────────────────────▶ AWAITING_OPERATOR (hang, diagnostics up)
//!     BUILD ────┤
//!       │       │
//!   RELAUNCH ───┘ spawn failure
//!       │
//!   RELAUNCHED (exit 0)
//! ```
//!
//! Recovery is keyed on one bit, `app_directory_modified`, which flips to
//! true right before the first file write and never flips back.

use std::convert::Infallible;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use fs2::FileExt;
use tokio::time::Instant;

use hotreload_core::paths;
use hotreload_core::Settings;
use hotreload_package::{
    check_manifest, decode_bounded, materialize, verify_digest, DeploymentPackage,
    ManifestChange, WriteResult,
};

use crate::diagnostic::DiagnosticListener;
use crate::error::{io_err, SupervisorError};
use crate::process::{
    local_probe_addr, read_pid_file, server_command, spawn_detached, wait_for_exit, wait_for_port,
};
use crate::session_log::SessionLog;
use crate::steps::run_step;

/// How often a hanging session retries a diagnostic bind that failed.
pub const DIAGNOSTIC_RETRY_INTERVAL: Duration = Duration::from_secs(30);

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Raw supervisor arguments as handed over by the admitting server.
#[derive(Debug, Clone, Default)]
pub struct RelaunchArgs {
    pub package: Option<PathBuf>,
    pub digest: Option<String>,
    pub log: Option<PathBuf>,
    pub test_mode: bool,
}

/// Validated arguments of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    pub package_path: PathBuf,
    pub expected_digest: String,
    pub log_path: PathBuf,
    pub test_mode: bool,
}

impl RelaunchArgs {
    pub fn into_plan(self) -> Result<SessionPlan, SupervisorError> {
        let package_path = self
            .package
            .ok_or(SupervisorError::MissingArgument("package"))?;
        let expected_digest = self
            .digest
            .filter(|digest| !digest.trim().is_empty())
            .ok_or(SupervisorError::MissingArgument("digest"))?;
        let log_path = self.log.ok_or(SupervisorError::MissingArgument("log"))?;
        Ok(SessionPlan {
            package_path,
            expected_digest,
            log_path,
            test_mode: self.test_mode,
        })
    }
}

// ---------------------------------------------------------------------------
// States and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitShutdown,
    Validate,
    DiffCheck,
    Write,
    Install,
    Build,
    Relaunch,
    Relaunched,
    FailedSafely,
    FatalNoShutdown,
    /// Terminal and unbounded: an operator has to intervene.
    AwaitingOperator,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::AwaitShutdown => "AWAIT_SHUTDOWN",
            SessionState::Validate => "VALIDATE",
            SessionState::DiffCheck => "DIFF_CHECK",
            SessionState::Write => "WRITE",
            SessionState::Install => "INSTALL",
            SessionState::Build => "BUILD",
            SessionState::Relaunch => "RELAUNCH",
            SessionState::Relaunched => "RELAUNCHED",
            SessionState::FailedSafely => "FAILED_SAFELY",
            SessionState::FatalNoShutdown => "FATAL_NO_SHUTDOWN",
            SessionState::AwaitingOperator => "AWAITING_OPERATOR",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Relaunched
                | SessionState::FailedSafely
                | SessionState::FatalNoShutdown
                | SessionState::AwaitingOperator
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// New code is live.
    Relaunched { pid: u32 },
    /// Rejected before any write; the previous server was restarted.
    FailedSafely {
        reason: SupervisorError,
        restarted_pid: u32,
    },
    /// Gave up before validation; nothing was touched and nothing started.
    Aborted { reason: SupervisorError },
    /// No server is running; the process must stay up for diagnostics.
    AwaitingOperator {
        reason: SupervisorError,
        app_directory_modified: bool,
    },
}

impl SessionOutcome {
    /// Process exit code, or `None` when the process must not exit.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            SessionOutcome::Relaunched { .. } => Some(0),
            SessionOutcome::FailedSafely { .. } | SessionOutcome::Aborted { .. } => Some(1),
            SessionOutcome::AwaitingOperator { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One end-to-end attempt to apply a staged package and restart the server.
pub struct RelaunchSession {
    settings: Settings,
    plan: SessionPlan,
    log: SessionLog,
    state: SessionState,
    app_directory_modified: bool,
    diagnostic: Option<DiagnosticListener>,
    // Held for the whole session, including an indefinite hang.
    staging_lock: Option<File>,
    // Resolved before WRITE: a build step may replace the running executable.
    server_argv: Result<Vec<String>, String>,
}

impl RelaunchSession {
    pub fn new(settings: Settings, plan: SessionPlan) -> Self {
        let log = SessionLog::open(&plan.log_path);
        let server_argv = server_command(&settings).map_err(|err| err.to_string());
        RelaunchSession {
            settings,
            plan,
            log,
            state: SessionState::AwaitShutdown,
            app_directory_modified: false,
            diagnostic: None,
            staging_lock: None,
            server_argv,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn app_directory_modified(&self) -> bool {
        self.app_directory_modified
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    /// Whether this session holds the cross-process staging lock.
    pub fn holds_staging_lock(&self) -> bool {
        self.staging_lock.is_some()
    }

    /// Address of the diagnostic listener, while one is bound.
    pub fn diagnostic_addr(&self) -> Option<SocketAddr> {
        self.diagnostic.as_ref().map(DiagnosticListener::local_addr)
    }

    /// Command line the next server generation will be started with.
    pub fn server_argv(&self) -> Option<&[String]> {
        self.server_argv.as_deref().ok()
    }

    /// Drive the session to a terminal state.
    pub async fn run(&mut self) -> SessionOutcome {
        self.log.info(format!(
            "relaunch supervisor started (pid {}, test mode: {})",
            std::process::id(),
            self.plan.test_mode
        ));

        self.enter(SessionState::AwaitShutdown);
        if let Err(reason) = self.await_shutdown().await {
            self.log.fatal(reason.to_string());
            self.enter(SessionState::FatalNoShutdown);
            return SessionOutcome::Aborted { reason };
        }
        self.open_diagnostic().await;

        self.enter(SessionState::Validate);
        let package = match self.validate() {
            Ok(package) => package,
            Err(reason) => return self.fail(reason).await,
        };

        self.enter(SessionState::DiffCheck);
        let install_needed = match self.diff_check(&package) {
            Ok(needed) => needed,
            Err(reason) => return self.fail(reason).await,
        };

        self.enter(SessionState::Write);
        self.mark_app_directory_modified();
        if let Err(reason) = self.write(&package) {
            return self.fail(reason).await;
        }

        if install_needed {
            self.enter(SessionState::Install);
            if let Err(reason) = self.install().await {
                return self.fail(reason).await;
            }
        }

        self.enter(SessionState::Build);
        if let Err(reason) = self.build().await {
            return self.fail(reason).await;
        }

        self.enter(SessionState::Relaunch);
        match self.start_server().await {
            Ok(pid) => {
                self.enter(SessionState::Relaunched);
                self.log.info(format!("relaunch complete; server pid {pid}"));
                SessionOutcome::Relaunched { pid }
            }
            Err(reason) => self.hold(reason).await,
        }
    }

    /// Stay up forever with the diagnostic listener open.
    ///
    /// A listener that cannot bind is retried every
    /// [`DIAGNOSTIC_RETRY_INTERVAL`], with a WARN line per failed attempt.
    pub async fn await_operator(mut self) -> Infallible {
        loop {
            if self.diagnostic.is_none() && !self.plan.test_mode {
                self.open_diagnostic().await;
            }
            tokio::time::sleep(DIAGNOSTIC_RETRY_INTERVAL).await;
        }
    }

    fn enter(&mut self, state: SessionState) {
        self.state = state;
        self.log.info(format!("state: {state}"));
    }

    fn mark_app_directory_modified(&mut self) {
        if !self.app_directory_modified {
            self.app_directory_modified = true;
            self.log
                .info("app directory is being modified; later failures cannot be rolled back");
        }
    }

    // -- AWAIT_SHUTDOWN ----------------------------------------------------

    async fn await_shutdown(&mut self) -> Result<(), SupervisorError> {
        let timeout = self.settings.hot_reload.shutdown_timeout();
        let deadline = Instant::now() + timeout;
        let state_dir = self.settings.state_dir();

        let lock_path = paths::staging_lock_path(&state_dir);
        self.staging_lock = Some(acquire_staging_lock(&lock_path, deadline).await?);

        let pid_path = paths::pid_file_path(&state_dir);
        let pid = match read_pid_file(&pid_path) {
            Ok(Some(pid)) => pid,
            Ok(None) => {
                self.log.warn(format!(
                    "no server pid recorded at {}; assuming the server has stopped",
                    pid_path.display()
                ));
                return Ok(());
            }
            Err(err) => {
                self.log
                    .warn(format!("{err}; assuming the server has stopped"));
                return Ok(());
            }
        };

        self.log.info(format!(
            "waiting for server pid {pid} to exit (timeout {}s)",
            timeout.as_secs()
        ));
        let remaining = deadline.saturating_duration_since(Instant::now());
        if wait_for_exit(pid, remaining).await {
            self.log.info(format!("server pid {pid} has exited"));
            Ok(())
        } else {
            Err(SupervisorError::ShutdownTimeout {
                pid,
                waited_secs: timeout.as_secs(),
            })
        }
    }

    // -- VALIDATE ----------------------------------------------------------

    fn validate(&self) -> Result<DeploymentPackage, SupervisorError> {
        let path = &self.plan.package_path;
        let bytes = fs::read(path).map_err(|e| io_err(path, e))?;
        let digest = verify_digest(&bytes, &self.plan.expected_digest)?;
        self.log
            .info(format!("digest verified: {digest} ({} bytes)", bytes.len()));

        let package =
            decode_bounded(&bytes, self.settings.hot_reload.max_uncompressed_bytes())?;
        self.log.info(format!(
            "package decoded: {} files, {} bytes uncompressed",
            package.file_count(),
            package.total_bytes()
        ));
        Ok(package)
    }

    // -- DIFF_CHECK --------------------------------------------------------

    fn diff_check(&self, package: &DeploymentPackage) -> Result<bool, SupervisorError> {
        let manifest = &self.settings.package.manifest_file;
        let change = check_manifest(&self.settings.app_dir, package, manifest)?;
        match &change {
            ManifestChange::NotInPackage => self
                .log
                .info(format!("{manifest} not in package; dependency install not needed")),
            ManifestChange::Unchanged => self
                .log
                .info(format!("{manifest} unchanged; dependency install not needed")),
            ManifestChange::Added => self
                .log
                .info(format!("{manifest} is new; dependency install required")),
            ManifestChange::Changed { unified_diff } => {
                self.log
                    .info(format!("{manifest} changed; dependency install required"));
                self.log.info(unified_diff);
            }
        }
        Ok(change.requires_install())
    }

    // -- WRITE -------------------------------------------------------------

    fn write(&self, package: &DeploymentPackage) -> Result<(), SupervisorError> {
        let report = materialize(&self.settings.app_dir, package, self.plan.test_mode);

        for result in &report.results {
            match result {
                WriteResult::WouldWrite { path, bytes } => self
                    .log
                    .info(format!("[test] would write: {} ({bytes} bytes)", path.display())),
                WriteResult::Failed { path, error } => self
                    .log
                    .error(format!("write failed: {}: {error}", path.display())),
                WriteResult::Written { .. } => {}
            }
        }

        if self.plan.test_mode {
            self.log.info(format!(
                "[test] {} files would be written; nothing was written",
                report.succeeded()
            ));
        } else {
            self.log.info(format!(
                "write finished: {} succeeded, {} failed",
                report.succeeded(),
                report.failed()
            ));
        }

        let first_failure = report
            .failures()
            .next()
            .map(|failed| failed.path().display().to_string());
        match first_failure {
            Some(first) => Err(SupervisorError::Write {
                failed: report.failed(),
                total: report.results.len(),
                first,
            }),
            None => Ok(()),
        }
    }

    // -- INSTALL / BUILD ---------------------------------------------------

    async fn install(&self) -> Result<(), SupervisorError> {
        let Some(argv) = &self.settings.commands.install else {
            self.log.info("no install command configured; skipping");
            return Ok(());
        };
        if self.plan.test_mode {
            self.log
                .info(format!("[test] would run install: `{}`", argv.join(" ")));
            return Ok(());
        }
        run_step(
            "install",
            argv,
            &self.settings.app_dir,
            self.settings.hot_reload.install_timeout(),
            &self.log,
        )
        .await
        .map_err(SupervisorError::DependencyInstall)
    }

    async fn build(&self) -> Result<(), SupervisorError> {
        let Some(argv) = &self.settings.commands.build else {
            self.log.info("no build command configured; skipping");
            return Ok(());
        };
        if self.plan.test_mode {
            self.log
                .info(format!("[test] would run build: `{}`", argv.join(" ")));
            return Ok(());
        }
        run_step(
            "build",
            argv,
            &self.settings.app_dir,
            self.settings.hot_reload.build_timeout(),
            &self.log,
        )
        .await
        .map_err(SupervisorError::Build)
    }

    // -- RELAUNCH and failure branches -------------------------------------

    /// Hand the port from the diagnostic listener to a new server process.
    async fn start_server(&mut self) -> Result<u32, SupervisorError> {
        self.close_diagnostic().await;

        let state_dir = self.settings.state_dir();
        let spawned = match &self.server_argv {
            Ok(argv) => {
                self.log
                    .info(format!("starting server: `{}`", argv.join(" ")));
                spawn_detached(
                    argv,
                    &self.settings.app_dir,
                    &paths::server_output_log_path(&state_dir),
                )
            }
            Err(message) => Err(SupervisorError::Spawn(message.clone())),
        };
        let pid = match spawned {
            Ok(pid) => pid,
            Err(err) => {
                self.log.error(err.to_string());
                return Err(if matches!(err, SupervisorError::Spawn(_)) {
                    err
                } else {
                    SupervisorError::Spawn(err.to_string())
                });
            }
        };
        self.log.info(format!("server spawned with pid {pid}"));

        let timeout = self.settings.hot_reload.restart_timeout();
        let addr = local_probe_addr(&self.settings.host, self.settings.port);
        if wait_for_port(addr, timeout).await {
            self.log
                .info(format!("server is accepting connections on {addr}"));
        } else {
            self.log.warn(format!(
                "server pid {pid} not accepting connections on {addr} after {}s",
                timeout.as_secs()
            ));
        }
        Ok(pid)
    }

    /// Route a failure by the modification bit alone.
    async fn fail(&mut self, reason: SupervisorError) -> SessionOutcome {
        self.log.error(reason.to_string());

        if self.app_directory_modified {
            return self.hold(reason).await;
        }

        self.log
            .info("app directory untouched; restarting the previous server");
        match self.start_server().await {
            Ok(restarted_pid) => {
                self.enter(SessionState::FailedSafely);
                self.log
                    .info(format!("previous server restarted with pid {restarted_pid}"));
                SessionOutcome::FailedSafely {
                    reason,
                    restarted_pid,
                }
            }
            Err(spawn_error) => self.hold(spawn_error).await,
        }
    }

    async fn hold(&mut self, reason: SupervisorError) -> SessionOutcome {
        self.open_diagnostic().await;
        self.enter(SessionState::AwaitingOperator);
        self.log.fatal(format!(
            "no server will be started; awaiting operator intervention (app directory modified: {})",
            self.app_directory_modified
        ));
        SessionOutcome::AwaitingOperator {
            reason,
            app_directory_modified: self.app_directory_modified,
        }
    }

    // -- Diagnostic listener -----------------------------------------------

    async fn open_diagnostic(&mut self) {
        if self.diagnostic.is_some() {
            return;
        }
        if self.plan.test_mode {
            self.log.info("[test] diagnostic listener skipped");
            return;
        }
        let host = self.settings.host.clone();
        let port = self.settings.diagnostic_port();
        match DiagnosticListener::start(&host, port, self.plan.log_path.clone()).await {
            Ok(listener) => {
                self.log.info(format!(
                    "diagnostic listener serving {} on {}",
                    paths::DIAGNOSTIC_STATUS_ROUTE,
                    listener.local_addr()
                ));
                self.diagnostic = Some(listener);
            }
            Err(err) => self.log.warn(format!(
                "diagnostic listener could not bind {host}:{port}: {err}; continuing without it"
            )),
        }
    }

    async fn close_diagnostic(&mut self) {
        if let Some(listener) = self.diagnostic.take() {
            listener
                .stop(self.settings.hot_reload.diagnostic_grace())
                .await;
            self.log.info("diagnostic listener stopped");
        }
    }
}

/// Take the cross-process staging lock, polling until `deadline`.
async fn acquire_staging_lock(
    path: &std::path::Path,
    deadline: Instant,
) -> Result<File, SupervisorError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    loop {
        if file.try_lock_exclusive().is_ok() {
            return Ok(file);
        }
        if Instant::now() >= deadline {
            return Err(SupervisorError::StagingLocked {
                path: path.to_path_buf(),
            });
        }
        tokio::time::sleep(LOCK_POLL_INTERVAL).await;
    }
}
