//! Claude Code process spawning and control.
//!
//! This module provides a builder pattern for configuring and spawning
//! Claude Code processes, along with control methods for managing the
//! running process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::config::{InputMode, PermissionMode};

/// Default executable name, resolved through `PATH`.
pub const DEFAULT_CLAUDE_BINARY: &str = "claude";

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("Claude binary not found: {0}")]
    NotFound(String),
    /// Permission denied when spawning.
    #[error("Permission denied executing {0}")]
    PermissionDenied(String),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(binary: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(binary.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(binary.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// Builder for configuring Claude Code process arguments.
///
/// The prompt itself is not an argument: it is written to stdin after spawn.
#[derive(Debug, Clone, Default)]
pub struct ClaudeProcessBuilder {
    model: Option<String>,
    allowed_tools: Vec<String>,
    disallowed_tools: Vec<String>,
    permission_mode: Option<PermissionMode>,
    resume_session: Option<String>,
    max_turns: Option<u32>,
    append_system_prompt: Option<String>,
    system_prompt: Option<String>,
    add_dirs: Vec<PathBuf>,
    include_partial_messages: bool,
    input_mode: InputMode,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
}

impl ClaudeProcessBuilder {
    /// Create a new builder with default arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model identifier.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the allowed tools for this session.
    #[must_use]
    pub fn allowed_tools<S: AsRef<str>>(mut self, tools: &[S]) -> Self {
        self.allowed_tools = tools.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    /// Set the disallowed tools for this session.
    #[must_use]
    pub fn disallowed_tools<S: AsRef<str>>(mut self, tools: &[S]) -> Self {
        self.disallowed_tools = tools.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    /// Set the permission mode.
    #[must_use]
    pub fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = Some(mode);
        self
    }

    /// Resume an existing session.
    #[must_use]
    pub fn resume(mut self, session_id: impl Into<String>) -> Self {
        self.resume_session = Some(session_id.into());
        self
    }

    /// Set the maximum number of turns.
    #[must_use]
    pub fn max_turns(mut self, turns: u32) -> Self {
        self.max_turns = Some(turns);
        self
    }

    /// Append to the system prompt.
    #[must_use]
    pub fn append_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.append_system_prompt = Some(prompt.into());
        self
    }

    /// Set a custom system prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Grant tool access to an additional directory.
    #[must_use]
    pub fn add_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.add_dirs.push(dir.into());
        self
    }

    /// Ask the CLI for partial-message stream events.
    #[must_use]
    pub fn include_partial_messages(mut self, enabled: bool) -> Self {
        self.include_partial_messages = enabled;
        self
    }

    /// Set how the prompt is delivered on stdin.
    #[must_use]
    pub fn input_mode(mut self, mode: InputMode) -> Self {
        self.input_mode = mode;
        self
    }

    /// Set the working directory for the Claude process.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable for the Claude process.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Get the working directory, if set.
    #[must_use]
    pub fn get_working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Get the input mode.
    #[must_use]
    pub fn get_input_mode(&self) -> InputMode {
        self.input_mode
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];

        if self.input_mode == InputMode::StreamJson {
            args.push("--input-format".to_string());
            args.push("stream-json".to_string());
        }

        if self.include_partial_messages {
            args.push("--include-partial-messages".to_string());
        }

        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if !self.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(self.allowed_tools.join(","));
        }

        if !self.disallowed_tools.is_empty() {
            args.push("--disallowedTools".to_string());
            args.push(self.disallowed_tools.join(","));
        }

        if let Some(mode) = self.permission_mode {
            args.push("--permission-mode".to_string());
            args.push(mode.as_str().to_string());
        }

        if let Some(session_id) = &self.resume_session {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }

        if let Some(turns) = self.max_turns {
            args.push("--max-turns".to_string());
            args.push(turns.to_string());
        }

        if let Some(prompt) = &self.system_prompt {
            args.push("--system-prompt".to_string());
            args.push(prompt.clone());
        }

        if let Some(prompt) = &self.append_system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(prompt.clone());
        }

        for dir in &self.add_dirs {
            args.push("--add-dir".to_string());
            args.push(dir.display().to_string());
        }

        args
    }
}

/// A running Claude Code process.
#[derive(Debug)]
pub struct ClaudeProcess {
    child: Child,
}

impl ClaudeProcess {
    /// Spawn a process using a custom binary.
    ///
    /// All three standard streams are piped. On Unix the child leads its own
    /// process group so [`ClaudeProcess::graceful_terminate`] reaches any
    /// helpers it starts.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn_with_binary(
        binary: &str,
        builder: &ClaudeProcessBuilder,
    ) -> Result<Self, SpawnError> {
        let args = builder.build_args();

        let mut cmd = Command::new(binary);
        cmd.args(&args)
            .envs(&builder.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        // Apply working directory if set
        if let Some(ref dir) = builder.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(
            command = %command_line(binary, &args),
            cwd = ?builder.working_dir,
            "Spawning Claude process"
        );

        let child = cmd
            .spawn()
            .map_err(|err| SpawnError::from_io(binary, err))?;

        Ok(Self { child })
    }

    /// Take ownership of the stdin handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Terminate the process, escalating to a kill after `grace`.
    ///
    /// On Unix, sends SIGTERM to the process group first, then SIGKILL after
    /// the grace period. On other platforms, falls back to immediate kill.
    /// Calling this on a process that already exited is a no-op that returns
    /// its status.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn graceful_terminate(&mut self, grace: Duration) -> std::io::Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }

        #[cfg(unix)]
        {
            self.graceful_terminate_unix(grace).await
        }

        #[cfg(not(unix))]
        {
            let _ = grace;
            self.child.kill().await?;
            self.child.wait().await
        }
    }

    #[cfg(unix)]
    async fn graceful_terminate_unix(&mut self, grace: Duration) -> std::io::Result<ExitStatus> {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.id() else {
            // Process already exited
            return self.child.wait().await;
        };
        let group = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));

        if let Err(err) = killpg(group, Signal::SIGTERM) {
            tracing::debug!(pid, error = %err, "SIGTERM to process group failed");
        }

        if let Ok(status) = tokio::time::timeout(grace, self.child.wait()).await {
            return status;
        }

        tracing::debug!(pid, "Grace period elapsed, sending SIGKILL");
        if let Err(err) = killpg(group, Signal::SIGKILL) {
            tracing::debug!(pid, error = %err, "SIGKILL to process group failed");
            self.child.start_kill()?;
        }
        self.child.wait().await
    }
}

/// Render a command line for logging.
fn command_line(binary: &str, args: &[String]) -> String {
    std::iter::once(binary)
        .chain(args.iter().map(String::as_str))
        .map(|part| shell_escape::escape(part.into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
