//! The managed server's hot-reload surface.
//!
//! Admits deployment packages on `POST /admin/hot-reload`, hands them to a
//! detached relaunch supervisor, then shuts down so the supervisor can
//! write, rebuild and restart.

pub mod admission;
pub mod auth;
mod error;
pub mod launcher;
pub mod routes;
mod runtime;
pub mod state;

pub use admission::{admit, last_session_log, HotReloadRequest};
pub use auth::{authenticate, CapabilityCheck};
pub use error::{AdmissionError, ServerError};
pub use launcher::{DetachedLauncher, LaunchRequest, SupervisorLauncher};
pub use routes::router;
pub use runtime::{run, serve, start_blocking};
pub use state::AppState;
