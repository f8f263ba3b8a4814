//! Server runtime: bind, record the pid, serve until a hand-off or signal.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use hotreload_core::paths::pid_file_path;
use hotreload_core::Settings;
use hotreload_supervisor::process::write_pid_file;

use crate::error::{io_err, ServerError};
use crate::launcher::{DetachedLauncher, SupervisorLauncher};
use crate::routes::router;
use crate::state::AppState;

/// Start a multi-thread runtime and serve on it until shutdown.
pub fn start_blocking(settings: Settings) -> Result<(), ServerError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(settings))
}

/// Bind the configured address and serve with the detached launcher.
pub async fn run(settings: Settings) -> Result<(), ServerError> {
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    serve(settings, listener, Arc::new(DetachedLauncher)).await
}

/// Serve on an already-bound listener.
///
/// Returns once a hot reload has been handed off, or on ctrl-c / SIGTERM.
/// The pid record is left in place after a hand-off so the supervisor can
/// wait on this process; it is removed on any other shutdown.
pub async fn serve(
    settings: Settings,
    listener: TcpListener,
    launcher: Arc<dyn SupervisorLauncher>,
) -> Result<(), ServerError> {
    let local_addr = listener
        .local_addr()
        .map_err(|e| io_err("server listener", e))?;
    let pid_file = pid_file_path(&settings.state_dir());
    write_pid_file(&pid_file, std::process::id())?;

    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let state = AppState::new(settings, launcher, shutdown_tx.clone());
    let app = router(state.clone());

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => {}
                reason = shutdown_signal() => {
                    tracing::info!(signal = reason, "shutting down server");
                    let _ = shutdown.send(());
                }
            }
        })
    };

    tracing::info!(
        addr = %local_addr,
        app_dir = %state.settings.app_dir.display(),
        pid = std::process::id(),
        "server listening"
    );

    let mut shutdown_rx = shutdown_tx.subscribe();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|source| ServerError::Serve {
            addr: local_addr,
            source,
        });
    signal_handle.abort();

    if state.is_handing_off() {
        tracing::info!("server stopped for relaunch");
    } else {
        if let Err(err) = std::fs::remove_file(&pid_file) {
            tracing::warn!(path = %pid_file.display(), error = %err, "could not remove pid file");
        }
        tracing::info!("server stopped");
    }
    result
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "ctrl-c",
        _ = terminate => "SIGTERM",
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
