//! Colored terminal output for generation streams.
//!
//! Text deltas go to stdout unadorned so the answer reads as prose; every
//! other event is printed as a tagged line.

use std::collections::HashMap;
use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::cli::{FinishReason, Usage};
use crate::provider::{ClassifiedError, StreamEvent};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Maximum length for truncated display strings.
const DEFAULT_MAX_LEN: usize = 80;

/// Truncate a string to a maximum number of characters, adding an ellipsis
/// if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize, raw_mode: bool) -> String {
    if raw_mode || s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{kept}...")
}

/// Format accumulated tool input for display, truncating long values.
///
/// Input that is not valid JSON is shown as-is.
#[must_use]
pub fn format_tool_input(input: &str, raw_mode: bool) -> String {
    match serde_json::from_str::<serde_json::Value>(input) {
        Ok(serde_json::Value::Object(map)) => map
            .iter()
            .map(|(k, v)| {
                let value_str = match v {
                    serde_json::Value::String(s) => truncate(s, 50, raw_mode),
                    other => truncate(&other.to_string(), 50, raw_mode),
                };
                format!("{k}={value_str}")
            })
            .collect::<Vec<_>>()
            .join(", "),
        Ok(other) => truncate(&other.to_string(), DEFAULT_MAX_LEN, raw_mode),
        Err(_) => truncate(input, DEFAULT_MAX_LEN, raw_mode),
    }
}

/// Format token usage as a compact summary.
#[must_use]
pub fn format_usage(usage: &Usage) -> String {
    let mut out = format!(
        "in={} out={}",
        usage.input_tokens, usage.output_tokens
    );
    if usage.cache_read_input_tokens > 0 || usage.cache_creation_input_tokens > 0 {
        out.push_str(&format!(
            " cache_read={} cache_write={}",
            usage.cache_read_input_tokens, usage.cache_creation_input_tokens
        ));
    }
    if let Some(cost) = usage.cost_usd {
        out.push_str(&format!(" cost=${cost:.4}"));
    }
    out
}

/// Print session start information.
pub fn print_session_start(model: &str, session_id: &str, raw_mode: bool) {
    println!(
        "{} {} model={}, session={}",
        timestamp().dimmed(),
        "[SESSION]".blue().bold(),
        model.cyan(),
        truncate(session_id, 20, raw_mode).dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print the terminal success line.
pub fn print_finish(reason: FinishReason, usage: &Usage) {
    println!();
    println!(
        "{} {} reason={} {}",
        timestamp().dimmed(),
        "[DONE]".blue().bold(),
        reason.as_str(),
        format_usage(usage).dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print a tool request once its input is complete.
pub fn print_tool_request(name: &str, input: &str, raw_mode: bool) {
    println!(
        "{} {} ({})",
        "[TOOL]".cyan().bold(),
        name.bold(),
        format_tool_input(input, raw_mode).dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print text content.
pub fn print_text(text: &str) {
    print!("{text}");
    let _ = io::stdout().flush();
}

/// Print tool result output.
pub fn print_tool_result(tool_use_id: &str, content: &str, is_error: bool, raw_mode: bool) {
    let id_short = truncate(tool_use_id, 12, raw_mode);
    let content_short = truncate(content, 150, raw_mode);
    let tag = if is_error {
        "[RESULT]".red().bold().to_string()
    } else {
        "[RESULT]".green().bold().to_string()
    };
    println!("{} {} {}", tag, id_short.dimmed(), content_short);
    let _ = io::stdout().flush();
}

/// Print a classified error to stderr.
pub fn print_error(error: &ClassifiedError, raw_mode: bool) {
    eprintln!(
        "{} {} {}",
        "[ERROR]".red().bold(),
        error.kind.as_str().bold(),
        truncate(&error.message, 200, raw_mode).red()
    );
    if let Some(code) = error.metadata.exit_code {
        eprintln!("  {}", format!("exit_code={code}").dimmed());
    }
    if let Some(tail) = &error.metadata.stderr_tail {
        for line in tail.lines() {
            eprintln!("  {}", line.dimmed());
        }
    }
}

/// Print one event as a JSON line (for `--json` mode).
pub fn print_json_event(event: &StreamEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
    }
    let _ = io::stdout().flush();
}

/// Renders a stream of events, buffering tool input until each call ends.
#[derive(Debug, Default)]
pub struct EventPrinter {
    model: String,
    raw_mode: bool,
    /// Tool name and accumulated input keyed by call id.
    pending_tools: HashMap<String, (String, String)>,
}

impl EventPrinter {
    #[must_use]
    pub fn new(model: impl Into<String>, raw_mode: bool) -> Self {
        Self {
            model: model.into(),
            raw_mode,
            pending_tools: HashMap::new(),
        }
    }

    /// Print one event.
    pub fn print(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::SessionInfo { session_id } => {
                print_session_start(&self.model, session_id, self.raw_mode);
            }
            StreamEvent::TextDelta { text } => print_text(text),
            StreamEvent::ToolCallStart { id, name } => {
                self.pending_tools
                    .insert(id.clone(), (name.clone(), String::new()));
            }
            StreamEvent::ToolCallDelta { id, input_delta } => {
                if let Some((_, input)) = self.pending_tools.get_mut(id) {
                    input.push_str(input_delta);
                }
            }
            StreamEvent::ToolCallEnd { id } => {
                if let Some((name, input)) = self.pending_tools.remove(id) {
                    print_tool_request(&name, &input, self.raw_mode);
                }
            }
            StreamEvent::ToolResult {
                id,
                content,
                is_error,
            } => print_tool_result(id, content, *is_error, self.raw_mode),
            StreamEvent::Usage { usage } => {
                tracing::debug!(usage = %format_usage(usage), "Usage update");
            }
            StreamEvent::Finish { reason, usage } => print_finish(*reason, usage),
            StreamEvent::Error { error } => print_error(error, self.raw_mode),
        }
    }
}
