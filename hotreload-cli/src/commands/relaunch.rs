//! `hotreload relaunch`: the detached relaunch supervisor.
//!
//! Exit codes: 0 relaunched, 1 failed safely or aborted. A session that
//! modified the app directory and then failed never exits.

use std::path::{Path, PathBuf};

use clap::Args;

use hotreload_supervisor::{start_blocking, RelaunchArgs, SessionLog};

/// Every argument is optional to clap so a missing one is reported in the
/// session log instead of only on stderr.
#[derive(Args, Debug)]
pub struct RelaunchCliArgs {
    /// Staged deployment package.
    #[arg(long)]
    pub package: Option<PathBuf>,

    /// Declared MD5 digest of the package.
    #[arg(long)]
    pub digest: Option<String>,

    /// Session log to append to.
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Simulate every mutating step.
    #[arg(long)]
    pub test: bool,
}

impl RelaunchCliArgs {
    pub fn run(self, config: &Path) -> i32 {
        let settings = match crate::load_settings(config) {
            Ok(settings) => settings,
            Err(err) => {
                eprintln!("relaunch refused: {err:#}");
                if let Some(log) = &self.log {
                    SessionLog::open(log).fatal(format!("relaunch refused: {err:#}"));
                }
                return 1;
            }
        };
        start_blocking(
            settings,
            RelaunchArgs {
                package: self.package,
                digest: self.digest,
                log: self.log,
                test_mode: self.test,
            },
        )
    }
}
