//! Error classification.
//!
//! Every failure a request can end with is resolved into one of a fixed set
//! of [`ErrorKind`]s. Classification is a pure function of exit status,
//! stderr, and message text.

use std::fmt;
use std::sync::OnceLock;

use regex::RegexSet;
use serde::{Deserialize, Serialize};

use crate::cli::SpawnError;

/// Lines of stderr kept for diagnostics.
pub const STDERR_TAIL_LINES: usize = 50;

/// Bytes of stderr kept for diagnostics.
pub const STDERR_TAIL_BYTES: usize = 4096;

/// Fixed error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Missing or invalid credentials for the CLI.
    AuthenticationError,
    /// The per-request timer fired first.
    TimeoutError,
    /// The caller cancelled.
    CancelledError,
    /// Malformed or out-of-order output.
    ProtocolError,
    /// Any other failure reported by, or about, the CLI.
    #[serde(rename = "APICallError")]
    ApiCallError,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticationError => "AuthenticationError",
            Self::TimeoutError => "TimeoutError",
            Self::CancelledError => "CancelledError",
            Self::ProtocolError => "ProtocolError",
            Self::ApiCallError => "APICallError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw diagnostics attached to a classified error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Signal that terminated the process, on Unix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_tail: Option<String>,
    /// Last session id seen before the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A failure resolved into the fixed taxonomy.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub metadata: ErrorMetadata,
}

impl ClassifiedError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            metadata: ErrorMetadata::default(),
        }
    }

    /// Attach diagnostics, keeping any fields already set.
    #[must_use]
    pub fn with_metadata(mut self, metadata: ErrorMetadata) -> Self {
        self.metadata.exit_code = self.metadata.exit_code.or(metadata.exit_code);
        self.metadata.signal = self.metadata.signal.or(metadata.signal);
        if self.metadata.stderr_tail.is_none() {
            self.metadata.stderr_tail = metadata.stderr_tail;
        }
        if self.metadata.session_id.is_none() {
            self.metadata.session_id = metadata.session_id;
        }
        self
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::CancelledError, "request was cancelled")
    }

    #[must_use]
    pub fn timeout(limit: std::time::Duration) -> Self {
        Self::new(
            ErrorKind::TimeoutError,
            format!("request timed out after {}ms", limit.as_millis()),
        )
    }

    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, message)
    }
}

fn auth_patterns() -> &'static RegexSet {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RegexSet::new([
            r"(?i)not\s+logged\s+in",
            r"(?i)please\s+run\s+/login",
            r"(?i)invalid\s+(api|x-api)[\s_-]?key",
            r"(?i)authentication(_error|\s+failed|\s+error|\s+required)",
            r"(?i)\bunauthori[sz]ed\b",
            r"(?i)\b401\b",
            r"(?i)oauth\s+token\s+(has\s+)?expired",
            r"(?i)credit\s+balance\s+is\s+too\s+low",
        ])
        .unwrap_or_else(|_| RegexSet::empty())
    })
}

/// Returns true if the text reads like a credentials problem.
#[must_use]
pub fn is_auth_failure(text: &str) -> bool {
    auth_patterns().is_match(text)
}

/// Classify an explicit error reported by the CLI on stdout.
#[must_use]
pub fn classify_error_record(message: &str, code: Option<&str>) -> ClassifiedError {
    let auth = is_auth_failure(message) || code.is_some_and(is_auth_failure);
    let kind = if auth {
        ErrorKind::AuthenticationError
    } else {
        ErrorKind::ApiCallError
    };
    let message = if message.trim().is_empty() {
        "Claude Code reported an error without a message".to_string()
    } else {
        message.to_string()
    };
    ClassifiedError::new(kind, message)
}

/// Classify a process that ended without a terminal record.
///
/// `exit_code` is `None` when the process was killed by a signal.
#[must_use]
pub fn classify_exit(
    exit_code: Option<i32>,
    signal: Option<i32>,
    stderr_tail: &str,
    session_id: Option<&str>,
) -> ClassifiedError {
    let metadata = ErrorMetadata {
        exit_code,
        signal,
        stderr_tail: (!stderr_tail.is_empty()).then(|| stderr_tail.to_string()),
        session_id: session_id.map(String::from),
    };

    let last_line = stderr_tail
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or_default()
        .trim();

    let error = match (exit_code, signal) {
        (Some(0), _) => ClassifiedError::protocol(
            "Claude Code exited successfully without emitting a result",
        ),
        _ if is_auth_failure(stderr_tail) => ClassifiedError::new(
            ErrorKind::AuthenticationError,
            format!("Claude Code authentication failed: {last_line}"),
        ),
        (Some(code), _) if last_line.is_empty() => ClassifiedError::new(
            ErrorKind::ApiCallError,
            format!("Claude Code exited with code {code}"),
        ),
        (Some(code), _) => ClassifiedError::new(
            ErrorKind::ApiCallError,
            format!("Claude Code exited with code {code}: {last_line}"),
        ),
        (None, Some(sig)) => ClassifiedError::new(
            ErrorKind::ApiCallError,
            format!("Claude Code was terminated by signal {sig}"),
        ),
        (None, None) => ClassifiedError::new(
            ErrorKind::ApiCallError,
            "Claude Code exited with an unknown status",
        ),
    };
    error.with_metadata(metadata)
}

/// Classify a failure to start the process.
#[must_use]
pub fn classify_spawn(err: &SpawnError) -> ClassifiedError {
    let message = match err {
        SpawnError::NotFound(binary) => {
            format!("Claude Code executable not found: {binary}")
        }
        SpawnError::PermissionDenied(binary) => {
            format!("Permission denied executing Claude Code: {binary}")
        }
        SpawnError::Io(io) => format!("Failed to start Claude Code: {io}"),
    };
    ClassifiedError::new(ErrorKind::ApiCallError, message)
}

/// Bounded tail of a process's stderr.
#[derive(Debug, Default, Clone)]
pub struct StderrTail {
    lines: std::collections::VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line, evicting the oldest lines past the limits.
    pub fn push(&mut self, line: &str) {
        let line = if line.len() > STDERR_TAIL_BYTES {
            let mut start = line.len() - STDERR_TAIL_BYTES;
            while !line.is_char_boundary(start) {
                start += 1;
            }
            &line[start..]
        } else {
            line
        };
        self.bytes += line.len();
        self.lines.push_back(line.to_string());

        while self.lines.len() > STDERR_TAIL_LINES || self.bytes > STDERR_TAIL_BYTES {
            match self.lines.pop_front() {
                Some(old) => self.bytes -= old.len(),
                None => break,
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The retained lines, newline-joined.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}
