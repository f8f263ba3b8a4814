//! `hotreload status`: current or most recent session log.
//!
//! Polls the route that both the server and the relaunch supervisor's
//! diagnostic listener answer, so it keeps working across a hand-off.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use hotreload_core::paths::DIAGNOSTIC_STATUS_ROUTE;
use hotreload_core::LogSource;
use hotreload_server::last_session_log;
use hotreload_supervisor::render_status;

use super::local_base_url;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Server base URL; defaults to the configured host and port.
    #[arg(long)]
    pub url: Option<String>,

    /// Bearer token of any known principal.
    #[arg(long, env = "HOTRELOAD_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Read the log from the local state directory instead of asking the
    /// server.
    #[arg(long)]
    pub local: bool,
}

impl StatusArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        let settings = crate::load_settings(config)?;

        if self.local {
            let last = last_session_log(&settings.state_dir());
            print!("{}", render_status(last.as_deref(), LogSource::Local));
            return Ok(());
        }

        let base = self.url.unwrap_or_else(|| local_base_url(&settings));
        let url = format!("{}{DIAGNOSTIC_STATUS_ROUTE}", base.trim_end_matches('/'));
        let mut request = ureq::get(&url);
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        let body = match request.call() {
            Ok(response) => response.into_string(),
            Err(ureq::Error::Status(status, response)) => {
                let text = response.into_string().unwrap_or_default();
                anyhow::bail!("status request failed (HTTP {status}): {}", text.trim());
            }
            Err(err) => return Err(err).with_context(|| format!("request to {url} failed")),
        }
        .with_context(|| format!("unreadable response from {url}"))?;
        print!("{body}");
        Ok(())
    }
}
