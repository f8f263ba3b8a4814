//! Diagnostic listener: the stand-in responder while no server holds the
//! public port.
//!
//! Serves the session log at [`DIAGNOSTIC_STATUS_ROUTE`] with a `[RELAUNCH]`
//! prefix and answers everything else with a fixed 503. No authentication:
//! it only ever exposes the session log.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use hotreload_core::paths::DIAGNOSTIC_STATUS_ROUTE;
use hotreload_core::LogSource;

use crate::session_log::render_status;

/// Body of every non-status response.
pub const RESTARTING_MESSAGE: &str =
    "Service is restarting after a code update. Check /api/admin/hot-reload-status for progress.\n";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// A running diagnostic listener.
#[derive(Debug)]
pub struct DiagnosticListener {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl DiagnosticListener {
    /// Bind `host:port` and start serving `log_path`.
    pub async fn start(host: &str, port: u16, log_path: PathBuf) -> std::io::Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        let app = router(log_path);
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        tracing::info!(addr = %local_addr, "diagnostic listener started");
        Ok(DiagnosticListener {
            local_addr,
            shutdown: Some(shutdown),
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait up to `grace` for open connections, then
    /// force-close whatever is left.
    pub async fn stop(mut self, grace: Duration) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(Ok(()))) => tracing::info!(addr = %self.local_addr, "diagnostic listener stopped"),
            Ok(Ok(Err(err))) => {
                tracing::warn!(addr = %self.local_addr, error = %err, "diagnostic listener exited with error")
            }
            Ok(Err(err)) => tracing::warn!(error = %err, "diagnostic listener task join failure"),
            Err(_) => {
                self.task.abort();
                tracing::warn!(
                    addr = %self.local_addr,
                    grace_ms = grace.as_millis() as u64,
                    "diagnostic listener force-closed after grace period"
                );
            }
        }
    }
}

impl Drop for DiagnosticListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Routes served by the diagnostic listener.
pub fn router(log_path: PathBuf) -> Router {
    Router::new()
        .route(DIAGNOSTIC_STATUS_ROUTE, get(status))
        .fallback(restarting)
        .with_state(Arc::new(log_path))
}

async fn status(State(log_path): State<Arc<PathBuf>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, TEXT_PLAIN)],
        render_status(Some(log_path.as_path()), LogSource::Relaunch),
    )
}

async fn restarting() -> impl IntoResponse {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::CONTENT_TYPE, TEXT_PLAIN), (header::RETRY_AFTER, "5")],
        RESTARTING_MESSAGE,
    )
}
