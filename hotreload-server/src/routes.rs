use std::fs;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use hotreload_core::paths::{
    DIAGNOSTIC_STATUS_ROUTE, DIGEST_HEADER, HOT_RELOAD_ROUTE, PING_ROUTE, STATUS_ROUTE,
    VERSION_ROUTE,
};
use hotreload_core::LogSource;
use hotreload_supervisor::render_status;

use crate::admission::{admit, last_session_log, HotReloadRequest};
use crate::auth::authenticate;
use crate::error::AdmissionError;
use crate::state::AppState;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Query string of the admission endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct HotReloadQuery {
    #[serde(default)]
    pub test: Option<String>,
}

impl HotReloadQuery {
    pub fn test_mode(&self) -> bool {
        matches!(
            self.test.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("1" | "true" | "yes")
        )
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.settings.hot_reload.max_package_bytes;
    Router::new()
        .route(HOT_RELOAD_ROUTE, post(hot_reload))
        .route(STATUS_ROUTE, get(status))
        .route(DIAGNOSTIC_STATUS_ROUTE, get(status))
        .route(PING_ROUTE, get(ping))
        .route(VERSION_ROUTE, get(version))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn hot_reload(
    State(state): State<AppState>,
    Query(query): Query<HotReloadQuery>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let principal = match authenticate(&headers, state.capability.as_ref()) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };
    let package_bytes = match body {
        Ok(bytes) => bytes,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return AdmissionError::TooLarge {
                limit: state.settings.hot_reload.max_package_bytes,
            }
            .into_response();
        }
        Err(rejection) => return AdmissionError::Body(rejection.body_text()).into_response(),
    };
    let declared_digest = headers
        .get(DIGEST_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let request = HotReloadRequest {
        package_bytes,
        declared_digest,
        test_mode: query.test_mode(),
        principal,
    };
    match admit(&state, request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Last session log, prefixed `[SERVER]`. Any authenticated principal.
async fn status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(err) = authenticate(&headers, state.capability.as_ref()) {
        return err.into_response();
    }
    let last = last_session_log(&state.settings.state_dir());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, TEXT_PLAIN)],
        render_status(last.as_deref(), LogSource::Server),
    )
        .into_response()
}

async fn ping() -> &'static str {
    "pong"
}

/// Contents of the managed tree's version file, else this build's version.
async fn version(State(state): State<AppState>) -> String {
    let settings = state.settings.as_ref();
    fs::read_to_string(settings.app_dir.join(&settings.package.version_file))
        .ok()
        .map(|contents| contents.trim().to_owned())
        .filter(|version| !version.is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_owned())
}
