pub mod package;
pub mod push;
pub mod relaunch;
pub mod serve;
pub mod status;

use hotreload_core::Settings;

/// Base URL of the server described by `settings`, for clients on this host.
pub(crate) fn local_base_url(settings: &Settings) -> String {
    let host = match settings.host.as_str() {
        "0.0.0.0" | "::" | "" => "127.0.0.1",
        other => other,
    };
    format!("http://{host}:{}", settings.port)
}
