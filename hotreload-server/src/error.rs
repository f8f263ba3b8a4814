use std::net::SocketAddr;
use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use hotreload_core::HotReloadResponse;
use hotreload_package::PackageError;
use hotreload_supervisor::SupervisorError;

/// Rejections of `POST /admin/hot-reload` and the authenticated status
/// routes.
///
/// Every variant up to `PackageCorrupt` is raised before anything is handed
/// to a supervisor, so the running server is left exactly as it was.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("missing or unknown bearer token")]
    Unauthenticated,

    #[error("principal {0} lacks the admin capability")]
    Forbidden(String),

    #[error("hot reload is disabled by configuration")]
    Policy,

    #[error("missing X-Content-MD5 header")]
    MissingDigest,

    #[error("integrity check failed: {0}")]
    Integrity(#[source] PackageError),

    #[error("{0}")]
    PackageCorrupt(#[source] PackageError),

    #[error("package exceeds the {limit} byte limit")]
    TooLarge { limit: usize },

    #[error("unreadable request body: {0}")]
    Body(String),

    #[error("a hot reload is already in progress")]
    Busy,

    #[error("staging failed: {0}")]
    Staging(String),

    #[error("could not start relaunch supervisor: {0}")]
    Spawn(#[source] SupervisorError),
}

impl AdmissionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::Policy => StatusCode::FORBIDDEN,
            Self::MissingDigest | Self::Integrity(_) | Self::Body(_) => StatusCode::BAD_REQUEST,
            Self::PackageCorrupt(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Busy => StatusCode::CONFLICT,
            Self::Staging(_) | Self::Spawn(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "hot reload admission failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "hot reload rejected");
        }
        (status, Json(HotReloadResponse::error(self.to_string()))).into_response()
    }
}

/// Failures that stop the server process itself.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server on {addr} failed: {source}")]
    Serve {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Supervisor(#[from] SupervisorError),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ServerError {
    ServerError::Io {
        path: path.into(),
        source,
    }
}
