//! Host-facing stream events and the non-streaming result.

use serde::{Deserialize, Serialize};

use crate::cli::{FinishReason, Usage};
use crate::provider::ClassifiedError;

/// One unit of generation progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// Session identifier assigned by the CLI.
    SessionInfo { session_id: String },
    /// Incremental text fragment.
    TextDelta { text: String },
    /// A CLI tool invocation was announced.
    ToolCallStart { id: String, name: String },
    /// Fragment of the tool input JSON.
    ToolCallDelta { id: String, input_delta: String },
    /// The tool input is complete.
    ToolCallEnd { id: String },
    /// Output of a completed tool invocation.
    ToolResult {
        id: String,
        content: String,
        is_error: bool,
    },
    /// Intermediate token and cost accounting.
    Usage { usage: Usage },
    /// Terminal success.
    Finish { reason: FinishReason, usage: Usage },
    /// Terminal failure.
    Error { error: ClassifiedError },
}

impl StreamEvent {
    /// Returns true for finish and error.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }
}

/// A tool invocation observed in the stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Concatenated input deltas.
    pub input: String,
    pub result: Option<String>,
    pub is_error: bool,
}

/// Reduction of a whole stream, returned by the non-streaming call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub usage: Usage,
    pub session_id: Option<String>,
    pub finish_reason: FinishReason,
    pub tool_calls: Vec<ToolCall>,
}

impl GenerationResult {
    /// Fold one event into the result.
    ///
    /// Returns the error if the event is a terminal failure.
    ///
    /// # Errors
    ///
    /// Returns the classified error carried by a terminal error event.
    pub fn apply(&mut self, event: StreamEvent) -> Result<(), ClassifiedError> {
        match event {
            StreamEvent::SessionInfo { session_id } => self.session_id = Some(session_id),
            StreamEvent::TextDelta { text } => self.text.push_str(&text),
            StreamEvent::ToolCallStart { id, name } => self.tool_calls.push(ToolCall {
                id,
                name,
                ..Default::default()
            }),
            StreamEvent::ToolCallDelta { id, input_delta } => {
                if let Some(call) = self.tool_call_mut(&id) {
                    call.input.push_str(&input_delta);
                }
            }
            StreamEvent::ToolCallEnd { .. } => {}
            StreamEvent::ToolResult {
                id,
                content,
                is_error,
            } => {
                if let Some(call) = self.tool_call_mut(&id) {
                    call.result = Some(content);
                    call.is_error = is_error;
                }
            }
            StreamEvent::Usage { usage } => self.usage = usage,
            StreamEvent::Finish { reason, usage } => {
                self.finish_reason = reason;
                self.usage = usage;
            }
            StreamEvent::Error { error } => return Err(error),
        }
        Ok(())
    }

    fn tool_call_mut(&mut self, id: &str) -> Option<&mut ToolCall> {
        self.tool_calls.iter_mut().rev().find(|call| call.id == id)
    }
}
