//! Hand-off to the relaunch supervisor process.

use std::path::Path;

use hotreload_core::paths::relaunch_output_log_path;
use hotreload_core::Settings;
use hotreload_supervisor::process::{relaunch_command, spawn_detached};
use hotreload_supervisor::SupervisorError;

/// What the supervisor needs to pick up an admitted package.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub package: &'a Path,
    pub digest: &'a str,
    pub log: &'a Path,
    pub test_mode: bool,
}

/// Starts a relaunch supervisor; returns its pid.
pub trait SupervisorLauncher: Send + Sync {
    fn launch(&self, settings: &Settings, request: &LaunchRequest<'_>) -> Result<u32, SupervisorError>;
}

/// Re-runs the current executable as `relaunch` in its own process group.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedLauncher;

impl SupervisorLauncher for DetachedLauncher {
    fn launch(&self, settings: &Settings, request: &LaunchRequest<'_>) -> Result<u32, SupervisorError> {
        let argv = relaunch_command(
            settings,
            request.package,
            request.digest,
            request.log,
            request.test_mode,
        )?;
        spawn_detached(
            &argv,
            &settings.app_dir,
            &relaunch_output_log_path(&settings.state_dir()),
        )
    }
}
