//! Relaunch supervisor: the detached process that applies a staged package
//! and restarts the server.
//!
//! The supervisor shares nothing in memory with either server generation.
//! It finds the old server through `run/server.pid`, reads the package from
//! the staging slot, reports through the session log, and stands in on the
//! public port with a [`DiagnosticListener`] while no server is up.

mod error;
pub mod diagnostic;
pub mod process;
pub mod retention;
pub mod session;
pub mod session_log;
pub mod steps;

pub use diagnostic::DiagnosticListener;
pub use error::SupervisorError;
pub use session::{RelaunchArgs, RelaunchSession, SessionOutcome, SessionPlan, SessionState};
pub use session_log::{render_status, SessionLog};

use hotreload_core::Settings;

/// Run one session to completion and return the process exit code.
///
/// Never returns when the session ends awaiting an operator.
pub async fn supervise(settings: Settings, args: RelaunchArgs) -> i32 {
    let log_path = args.log.clone();
    let plan = match args.into_plan() {
        Ok(plan) => plan,
        Err(err) => {
            tracing::error!(error = %err, "relaunch refused");
            if let Some(path) = log_path {
                SessionLog::open(&path).fatal(format!("relaunch refused: {err}"));
            }
            return 1;
        }
    };

    let mut session = RelaunchSession::new(settings, plan);
    let outcome = session.run().await;
    match outcome.exit_code() {
        Some(code) => {
            session
                .log()
                .info(format!("relaunch supervisor exiting with code {code}"));
            code
        }
        None => match session.await_operator().await {},
    }
}

/// Build a runtime, run [`supervise`] on it, and return the exit code.
pub fn start_blocking(settings: Settings, args: RelaunchArgs) -> i32 {
    init_tracing();
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "failed to build tokio runtime");
            return 1;
        }
    };
    runtime.block_on(supervise(settings, args))
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
