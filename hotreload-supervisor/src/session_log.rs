//! Per-session event log.
//!
//! One line per event: `<RFC3339 UTC millis> <LEVEL> <message>`. The file is
//! opened in append mode for every line so the server, the supervisor and
//! the next server generation can all add to it without coordinating.
//! Callers grep for `WARN`, `ERROR` and `FATAL`, so levels are always spelled
//! out in upper case.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use hotreload_core::{LogLevel, LogSource};

use crate::error::{io_err, SupervisorError};

/// Handle on one session log file.
#[derive(Debug, Clone)]
pub struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    /// Create a fresh log at `path`, truncating anything already there, and
    /// write `first_line` as an INFO event.
    pub fn create(path: &Path, first_line: &str) -> Result<SessionLog, SupervisorError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        fs::write(path, format_line(LogLevel::Info, first_line)).map_err(|e| io_err(path, e))?;
        tracing::info!(log = %path.display(), "{first_line}");
        Ok(SessionLog {
            path: path.to_path_buf(),
        })
    }

    /// Attach to an existing log (or one that will be created on first write).
    pub fn open(path: &Path) -> SessionLog {
        SessionLog {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.append(LogLevel::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.append(LogLevel::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.append(LogLevel::Error, message.as_ref());
    }

    pub fn fatal(&self, message: impl AsRef<str>) {
        self.append(LogLevel::Fatal, message.as_ref());
    }

    /// Append one event and mirror it into tracing.
    ///
    /// A failing log write is reported through tracing only; losing a log
    /// line must never change how the session proceeds.
    pub fn append(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error | LogLevel::Fatal => tracing::error!("{level} {message}"),
        }

        let mut text = String::new();
        for line in message.lines() {
            text.push_str(&format_line(level, line));
        }
        if text.is_empty() {
            text = format_line(level, "");
        }

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(text.as_bytes()));
        if let Err(err) = result {
            tracing::warn!(log = %self.path.display(), error = %err, "failed to append to session log");
        }
    }

    /// Append the trailing `max_lines` lines of command output, indented.
    pub fn append_tail(&self, label: &str, output: &[u8], max_lines: usize) {
        let text = String::from_utf8_lossy(output);
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            return;
        }
        let skipped = lines.len().saturating_sub(max_lines);
        if skipped > 0 {
            self.info(format!("{label}: ({skipped} earlier lines omitted)"));
        }
        for line in &lines[skipped..] {
            self.info(format!("{label}: | {line}"));
        }
    }
}

fn format_line(level: LogLevel, message: &str) -> String {
    format!(
        "{} {level} {message}\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

/// Status body: the source prefix line followed by the log verbatim.
///
/// A missing log is not an error for a status reader; the body says so.
pub fn render_status(log_path: Option<&Path>, source: LogSource) -> String {
    let mut body = format!("{}\n", source.prefix());
    let Some(path) = log_path else {
        body.push_str("no hot-reload session has run yet\n");
        return body;
    };
    match fs::read_to_string(path) {
        Ok(contents) => body.push_str(&contents),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            body.push_str(&format!("session log {} not found\n", path.display()));
        }
        Err(err) => {
            body.push_str(&format!("session log {} unreadable: {err}\n", path.display()));
        }
    }
    body
}
