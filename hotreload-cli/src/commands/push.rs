//! `hotreload push`: build a package and hand it to a running server.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use hotreload_core::paths::{DIGEST_HEADER, HOT_RELOAD_ROUTE};
use hotreload_core::HotReloadResponse;

use super::local_base_url;
use super::package::build_from;

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Source tree to package; defaults to the working directory.
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Server base URL; defaults to the configured host and port.
    #[arg(long)]
    pub url: Option<String>,

    /// Bearer token of an admin principal.
    #[arg(long, env = "HOTRELOAD_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Ask the supervisor to simulate every mutating step.
    #[arg(long)]
    pub test: bool,
}

impl PushArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        let settings = crate::load_settings(config)?;
        let (source, built) = build_from(self.source, &settings)?;
        let base = self.url.unwrap_or_else(|| local_base_url(&settings));
        let mut url = format!("{}{HOT_RELOAD_ROUTE}", base.trim_end_matches('/'));
        if self.test {
            url.push_str("?test=true");
        }

        println!(
            "pushing {} files ({} bytes, digest {}) from {} to {url}",
            built.file_count(),
            built.bytes.len(),
            built.digest,
            source.display()
        );

        let result = ureq::post(&url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set(DIGEST_HEADER, built.digest.as_str())
            .set("Content-Type", "application/zip")
            .send_bytes(&built.bytes);

        let (status, response) = match result {
            Ok(response) => (response.status(), response),
            Err(ureq::Error::Status(status, response)) => (status, response),
            Err(err) => return Err(err).with_context(|| format!("request to {url} failed")),
        };
        let body: HotReloadResponse = response
            .into_json()
            .with_context(|| format!("unreadable response from {url} (HTTP {status})"))?;

        if !body.ok {
            bail!(
                "hot reload rejected (HTTP {status}): {}",
                body.error.as_deref().unwrap_or("no reason given")
            );
        }
        println!(
            "{} {} files; session log {}",
            "admitted".green().bold(),
            body.file_count.unwrap_or_default(),
            body.log_file.as_deref().unwrap_or("-")
        );
        println!("follow progress with `hotreload status`");
        Ok(())
    }
}
