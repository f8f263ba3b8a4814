//! hotreload core library: domain types, settings, state-dir layout, errors.
//!
//! Public API surface:
//! - [`types`]: digest newtype, package entries, wire response, log vocabulary
//! - [`config`]: [`Settings`] loaded from `hotreload.yaml`
//! - [`paths`]: where the staging slot, pid record and session logs live
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::{CommandSettings, HotReloadSettings, PackagePolicy, Settings, TokenGrant};
pub use error::ConfigError;
pub use types::{
    HotReloadResponse, LogLevel, LogSource, PackageDigest, PackageEntry, Principal,
};
