//! `hotreload serve`: run the application server in the foreground.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use hotreload_server::start_blocking;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Override the configured port.
    #[arg(long)]
    pub port: Option<u16>,
}

impl ServeArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        let mut settings = crate::load_settings(config)?;
        if let Some(port) = self.port {
            settings.port = port;
        }
        start_blocking(settings).context("server exited with error")
    }
}
