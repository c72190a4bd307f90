//! Configuration types.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Default time between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Permission mode passed to `--permission-mode`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

impl PermissionMode {
    /// The CLI spelling of this mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
            Self::Plan => "plan",
        }
    }
}

impl std::str::FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "acceptEdits" => Ok(Self::AcceptEdits),
            "bypassPermissions" => Ok(Self::BypassPermissions),
            "plan" => Ok(Self::Plan),
            other => Err(format!("unknown permission mode: {other}")),
        }
    }
}

/// How the prompt is delivered on stdin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputMode {
    /// Plain prompt text; stdin is closed once written.
    #[default]
    Text,
    /// One JSON user message; stdin stays open until the result arrives.
    StreamJson,
}

/// Per-request settings resolved by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Wall-clock limit for the whole request, in seconds.
    pub timeout_secs: Option<u64>,
    /// Time between SIGTERM and SIGKILL, in milliseconds.
    pub kill_grace_ms: Option<u64>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub permission_mode: Option<PermissionMode>,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Session to resume with `--resume`.
    pub resume: Option<String>,
    pub max_turns: Option<u32>,
    pub append_system_prompt: Option<String>,
    pub add_dirs: Vec<PathBuf>,
    pub input_mode: Option<InputMode>,
    pub include_partial_messages: Option<bool>,
}

impl Settings {
    /// Effective request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs)
    }

    /// Effective kill grace period.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        self.kill_grace_ms
            .map_or(DEFAULT_KILL_GRACE, Duration::from_millis)
    }

    /// Effective stdin delivery mode.
    #[must_use]
    pub fn input_mode(&self) -> InputMode {
        self.input_mode.unwrap_or_default()
    }

    /// Whether partial assistant messages are requested.
    #[must_use]
    pub fn partial_messages(&self) -> bool {
        self.include_partial_messages.unwrap_or(false)
    }

    /// Fill every unset field from `defaults`.
    #[must_use]
    pub fn with_defaults(mut self, defaults: &Settings) -> Self {
        self.timeout_secs = self.timeout_secs.or(defaults.timeout_secs);
        self.kill_grace_ms = self.kill_grace_ms.or(defaults.kill_grace_ms);
        if self.allowed_tools.is_empty() {
            self.allowed_tools.clone_from(&defaults.allowed_tools);
        }
        if self.disallowed_tools.is_empty() {
            self.disallowed_tools.clone_from(&defaults.disallowed_tools);
        }
        self.permission_mode = self.permission_mode.or(defaults.permission_mode);
        if self.working_dir.is_none() {
            self.working_dir.clone_from(&defaults.working_dir);
        }
        for (key, value) in &defaults.env {
            self.env.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self.max_turns = self.max_turns.or(defaults.max_turns);
        if self.append_system_prompt.is_none() {
            self.append_system_prompt
                .clone_from(&defaults.append_system_prompt);
        }
        if self.add_dirs.is_empty() {
            self.add_dirs.clone_from(&defaults.add_dirs);
        }
        self.input_mode = self.input_mode.or(defaults.input_mode);
        self.include_partial_messages = self
            .include_partial_messages
            .or(defaults.include_partial_messages);
        self
    }
}

/// Provider-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Path or name of the Claude Code executable.
    pub executable: String,
    /// Maximum concurrently running processes; `None` means unbounded.
    pub max_concurrent_processes: Option<usize>,
    /// Default model when a request does not name one.
    pub default_model: String,
    /// Defaults merged into every request's settings.
    pub defaults: Settings,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            executable: crate::cli::DEFAULT_CLAUDE_BINARY.to_string(),
            max_concurrent_processes: Some(4),
            default_model: "sonnet".to_string(),
            defaults: Settings::default(),
        }
    }
}
