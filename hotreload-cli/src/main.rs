//! hotreload: transfer, validate, write, rebuild and restart a running
//! server in place.
//!
//! # Usage
//!
//! ```text
//! hotreload serve [--config hotreload.yaml]
//! hotreload package build [--source <dir>] [--list]
//! hotreload push [--source <dir>] [--url <url>] [--token <token>] [--test]
//! hotreload status [--url <url>] [--token <token>] [--local]
//! ```
//!
//! `hotreload relaunch` is spawned by the server itself and is not meant to
//! be run by hand.

mod commands;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{
    package::PackageCommand, push::PushArgs, relaunch::RelaunchCliArgs, serve::ServeArgs,
    status::StatusArgs,
};
use hotreload_core::Settings;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "hotreload",
    version,
    about = "Replace a running server's code without a redeploy",
    long_about = None,
)]
struct Cli {
    /// Settings file; a missing file means defaults.
    #[arg(long, global = true, default_value = "hotreload.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the application server with the hot-reload endpoint.
    Serve(ServeArgs),

    /// Apply a staged package and restart the server (spawned by `serve`).
    #[command(hide = true)]
    Relaunch(RelaunchCliArgs),

    /// Build deployment packages.
    Package {
        #[command(subcommand)]
        command: PackageCommand,
    },

    /// Build a package and send it to a running server.
    Push(PushArgs),

    /// Show the current or most recent hot-reload session log.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

pub(crate) fn load_settings(config: &Path) -> Result<Settings> {
    let cwd = std::env::current_dir().context("could not determine working directory")?;
    Settings::load_or_default_at(config, &cwd)
        .with_context(|| format!("failed to load settings from {}", config.display()))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => args.run(&cli.config),
        Commands::Relaunch(args) => std::process::exit(args.run(&cli.config)),
        Commands::Package { command } => commands::package::run(command, &cli.config),
        Commands::Push(args) => args.run(&cli.config),
        Commands::Status(args) => args.run(&cli.config),
    }
}
