//! Domain types shared by the server, the relaunch supervisor and the CLI.
//!
//! Nothing here performs I/O; hashing and archive handling live in
//! `hotreload-package`.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Whole-package MD5 digest, stored as 32 lowercase hex characters.
///
/// A package is identified by this value alone; there are no per-file
/// checksums anywhere in the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageDigest(pub String);

impl PackageDigest {
    /// Compare against a digest declared by a client (header value, CLI arg).
    ///
    /// Surrounding whitespace and hex case are ignored; anything else must
    /// match exactly, so a short or malformed declaration never matches.
    pub fn matches(&self, declared: &str) -> bool {
        self.0.eq_ignore_ascii_case(declared.trim())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PackageDigest {
    fn from(s: String) -> Self {
        Self(s.to_ascii_lowercase())
    }
}

impl From<&str> for PackageDigest {
    fn from(s: &str) -> Self {
        Self(s.to_ascii_lowercase())
    }
}

// ---------------------------------------------------------------------------
// Package entries
// ---------------------------------------------------------------------------

/// One file inside a deployment package.
///
/// `relative_path` always uses `/` separators and never escapes the tree root
/// (decoding rejects `..` and absolute names).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    pub relative_path: String,
    pub bytes: Vec<u8>,
}

impl PackageEntry {
    pub fn new(relative_path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            relative_path: relative_path.into(),
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Principals
// ---------------------------------------------------------------------------

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub admin: bool,
}

// ---------------------------------------------------------------------------
// Session log vocabulary
// ---------------------------------------------------------------------------

/// Severity of a session log line. The rendered names are matched literally
/// by callers polling the status route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Which process is answering a status request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    /// The running application server.
    Server,
    /// The relaunch supervisor's diagnostic listener.
    Relaunch,
    /// Read straight from the state directory; no process answered.
    Local,
}

impl LogSource {
    /// First line of every status response.
    pub fn prefix(self) -> &'static str {
        match self {
            LogSource::Server => "[SERVER]",
            LogSource::Relaunch => "[RELAUNCH]",
            LogSource::Local => "[LOCAL]",
        }
    }
}

// ---------------------------------------------------------------------------
// Wire response
// ---------------------------------------------------------------------------

/// JSON body returned by `POST /admin/hot-reload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotReloadResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HotReloadResponse {
    pub fn admitted(log_file: impl Into<String>, file_count: usize) -> Self {
        Self {
            ok: true,
            log_file: Some(log_file.into()),
            file_count: Some(file_count),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            log_file: None,
            file_count: None,
            error: Some(message.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
