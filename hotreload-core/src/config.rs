//! `hotreload.yaml` settings.
//!
//! # Resolution
//!
//! Every key is optional. Relative paths (`app_dir`, `state_dir`) resolve
//! against the directory holding the settings file, so a server, its relaunch
//! supervisor and the next server generation all agree on the same tree no
//! matter which working directory they were spawned from.
//!
//! The settings path itself is canonicalized by [`Settings::load_at`] and kept
//! in [`Settings::source`] so it can be handed to detached processes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::error::{io_err, ConfigError};

/// Default settings file name, looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "hotreload.yaml";

/// How far a package may expand when decoded, relative to its size limit.
pub const MAX_EXPANSION_RATIO: u64 = 16;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Knobs for the hot-reload protocol itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadSettings {
    /// Outside test mode, admission is refused unless this is `true`.
    pub enabled: bool,
    pub shutdown_timeout_secs: u64,
    pub restart_timeout_secs: u64,
    pub install_timeout_secs: u64,
    pub build_timeout_secs: u64,
    /// Forced-close grace for lingering diagnostic connections.
    pub diagnostic_grace_ms: u64,
    pub max_package_bytes: usize,
    pub retained_session_logs: usize,
}

impl Default for HotReloadSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            shutdown_timeout_secs: 30,
            restart_timeout_secs: 30,
            install_timeout_secs: 600,
            build_timeout_secs: 1800,
            diagnostic_grace_ms: 2000,
            max_package_bytes: 64 * 1024 * 1024,
            retained_session_logs: 20,
        }
    }
}

impl HotReloadSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.restart_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn diagnostic_grace(&self) -> Duration {
        Duration::from_millis(self.diagnostic_grace_ms)
    }

    /// Total uncompressed bytes a package may decode to.
    pub fn max_uncompressed_bytes(&self) -> u64 {
        (self.max_package_bytes as u64).saturating_mul(MAX_EXPANSION_RATIO)
    }
}

/// Which files of the source tree make up a deployment package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagePolicy {
    /// Subtrees walked recursively.
    pub source_dirs: Vec<String>,
    /// Extensions (without the dot) admitted from the subtrees.
    pub extensions: Vec<String>,
    /// Top-level files always included; a missing one aborts the build.
    pub required_files: Vec<String>,
    /// Any path segment starting with this prefix is excluded.
    pub isolation_prefix: String,
    /// Dependency manifest compared during the diff check.
    pub manifest_file: String,
    /// File under the app dir served by `GET /api/version`.
    pub version_file: String,
}

impl Default for PackagePolicy {
    fn default() -> Self {
        Self {
            source_dirs: vec!["src".to_string()],
            extensions: ["rs", "toml", "sql", "html", "css", "js", "json", "md"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            required_files: vec!["Cargo.toml".to_string(), "Cargo.lock".to_string()],
            isolation_prefix: ".isolated-".to_string(),
            manifest_file: "Cargo.lock".to_string(),
            version_file: "VERSION".to_string(),
        }
    }
}

/// External commands run by the relaunch supervisor, as argv vectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    /// Dependency installation; `null` skips the step.
    pub install: Option<Vec<String>>,
    /// Build step; `null` skips the step.
    pub build: Option<Vec<String>>,
    /// Server launch; empty re-executes the current binary with `serve`.
    pub start: Vec<String>,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            install: Some(vec!["cargo".to_string(), "fetch".to_string()]),
            build: Some(vec![
                "cargo".to_string(),
                "build".to_string(),
                "--release".to_string(),
            ]),
            start: Vec::new(),
        }
    }
}

/// A bearer token and the principal it authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub principal: String,
    pub token: String,
    #[serde(default)]
    pub admin: bool,
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

/// Root of `hotreload.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// The managed code tree.
    pub app_dir: PathBuf,
    /// Staging slot, pid record and logs. Defaults to `<app_dir>/.hotreload`.
    pub state_dir: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    /// Defaults to `port`: the diagnostic listener stands in on the public port.
    pub diagnostic_port: Option<u16>,
    pub hot_reload: HotReloadSettings,
    pub package: PackagePolicy,
    pub commands: CommandSettings,
    pub tokens: Vec<TokenGrant>,

    /// Canonical path of the file these settings came from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_dir: PathBuf::from("."),
            state_dir: None,
            host: "0.0.0.0".to_string(),
            port: 80,
            diagnostic_port: None,
            hot_reload: HotReloadSettings::default(),
            package: PackagePolicy::default(),
            commands: CommandSettings::default(),
            tokens: Vec::new(),
            source: None,
        }
    }
}

impl Settings {
    /// Load settings from `path`.
    ///
    /// Returns `ConfigError::Io` if the file cannot be read and
    /// `ConfigError::Parse` (with path + line context) if it is malformed.
    pub fn load_at(path: &Path) -> Result<Settings, ConfigError> {
        let canonical = std::fs::canonicalize(path).map_err(|e| io_err(path, e))?;
        let contents = std::fs::read_to_string(&canonical).map_err(|e| io_err(&canonical, e))?;
        let mut settings: Settings = if contents.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: canonical.clone(),
                source: e,
            })?
        };

        let base = canonical
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        settings.resolve_paths(&base);
        settings.source = Some(canonical);
        settings.validate()?;
        Ok(settings)
    }

    /// Load `path` if it exists, otherwise defaults resolved against `cwd`.
    pub fn load_or_default_at(path: &Path, cwd: &Path) -> Result<Settings, ConfigError> {
        if path.exists() {
            return Settings::load_at(path);
        }
        let mut settings = Settings::default();
        settings.resolve_paths(cwd);
        settings.validate()?;
        Ok(settings)
    }

    /// Make `app_dir` and `state_dir` absolute relative to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.app_dir.is_relative() {
            self.app_dir = normalize(&base.join(&self.app_dir));
        }
        self.state_dir = Some(match self.state_dir.take() {
            Some(dir) if dir.is_relative() => normalize(&base.join(dir)),
            Some(dir) => dir,
            None => self.app_dir.join(".hotreload"),
        });
    }

    /// Resolved state directory.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.app_dir.join(".hotreload"))
    }

    pub fn diagnostic_port(&self) -> u16 {
        self.diagnostic_port.unwrap_or(self.port)
    }

    /// Look up the grant for a presented bearer token.
    ///
    /// Each comparison runs in constant time for tokens of equal length.
    pub fn grant_for_token(&self, token: &str) -> Option<&TokenGrant> {
        self.tokens
            .iter()
            .find(|grant| bool::from(grant.token.as_bytes().ct_eq(token.as_bytes())))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.package.source_dirs.is_empty() && self.package.required_files.is_empty() {
            return Err(ConfigError::Invalid {
                key: "package",
                message: "at least one source dir or required file is needed".to_string(),
            });
        }
        if self.package.manifest_file.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "package.manifest_file",
                message: "must not be empty".to_string(),
            });
        }
        if self.tokens.iter().any(|grant| grant.token.is_empty()) {
            return Err(ConfigError::Invalid {
                key: "tokens",
                message: "empty tokens are not allowed".to_string(),
            });
        }
        for (key, command) in [
            ("commands.install", &self.commands.install),
            ("commands.build", &self.commands.build),
        ] {
            if matches!(command, Some(argv) if argv.is_empty()) {
                return Err(ConfigError::Invalid {
                    key,
                    message: "use null to skip the step instead of an empty list".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Lexically drop `.` components so logged paths stay readable.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_disable_hot_reload() {
        let settings = Settings::default();
        assert!(!settings.hot_reload.enabled);
        assert_eq!(settings.hot_reload.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(settings.hot_reload.max_uncompressed_bytes(), 1 << 30);
        assert_eq!(settings.port, 80);
        assert_eq!(settings.diagnostic_port(), 80);
    }

    #[test]
    fn relative_paths_resolve_against_settings_file() {
        let tmp = TempDir::new().unwrap();
        let config = tmp.path().join("hotreload.yaml");
        std::fs::write(&config, "app_dir: ./app\nport: 8080\n").unwrap();

        let settings = Settings::load_at(&config).unwrap();
        let root = std::fs::canonicalize(tmp.path()).unwrap();
        assert_eq!(settings.app_dir, root.join("app"));
        assert_eq!(settings.state_dir(), root.join("app").join(".hotreload"));
        assert_eq!(settings.diagnostic_port(), 8080);
        assert_eq!(settings.source.as_deref(), Some(config.canonicalize().unwrap().as_path()));
    }

    #[test]
    fn explicit_state_dir_is_kept() {
        let tmp = TempDir::new().unwrap();
        let config = tmp.path().join("hotreload.yaml");
        std::fs::write(&config, "state_dir: /var/lib/hotreload\n").unwrap();
        let settings = Settings::load_at(&config).unwrap();
        assert_eq!(settings.state_dir(), PathBuf::from("/var/lib/hotreload"));
    }

    #[test]
    fn empty_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = tmp.path().join("hotreload.yaml");
        std::fs::write(&config, "").unwrap();
        let settings = Settings::load_at(&config).unwrap();
        assert_eq!(settings.package, PackagePolicy::default());
    }

    #[test]
    fn null_command_disables_step() {
        let tmp = TempDir::new().unwrap();
        let config = tmp.path().join("hotreload.yaml");
        std::fs::write(&config, "commands:\n  install: null\n  build: [\"make\"]\n").unwrap();
        let settings = Settings::load_at(&config).unwrap();
        assert_eq!(settings.commands.install, None);
        assert_eq!(settings.commands.build, Some(vec!["make".to_string()]));
        assert!(settings.commands.start.is_empty());
    }

    #[test]
    fn empty_command_list_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let config = tmp.path().join("hotreload.yaml");
        std::fs::write(&config, "commands:\n  build: []\n").unwrap();
        let err = Settings::load_at(&config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "commands.build", .. }), "got: {err}");
    }

    #[test]
    fn grant_lookup_matches_exact_token() {
        let settings = Settings {
            tokens: vec![TokenGrant {
                principal: "ops".to_string(),
                token: "s3cret".to_string(),
                admin: true,
            }],
            ..Settings::default()
        };
        assert_eq!(settings.grant_for_token("s3cret").map(|g| g.principal.as_str()), Some("ops"));
        assert!(settings.grant_for_token("s3cre").is_none());
        assert!(settings.grant_for_token("s3cret!").is_none());
        assert!(settings.grant_for_token("").is_none());
    }

    #[test]
    fn missing_file_falls_back_to_cwd_defaults() {
        let tmp = TempDir::new().unwrap();
        let settings =
            Settings::load_or_default_at(&tmp.path().join("nope.yaml"), tmp.path()).unwrap();
        assert_eq!(settings.app_dir, tmp.path());
        assert!(settings.source.is_none());
    }
}
