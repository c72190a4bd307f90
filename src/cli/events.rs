//! Record types from Claude Code stream-json output.
//!
//! This module defines every record the external CLI may write to stdout
//! when running with `--output-format stream-json`. The set is closed: a
//! record with an unrecognized `type` tag fails to parse instead of being
//! ignored.
//!
//! Two vocabularies share the same line protocol. The message envelopes
//! (`system`, `assistant`, `user`, `stream_event`, `result`) carry whole
//! Anthropic-style messages, while the flat records (`text`,
//! `tool_call_start`, ..., `done`, `error`) carry one delta each.

use serde::{Deserialize, Serialize};

/// Token and cost accounting.
///
/// Every field is optional on the wire. `tokens` is an explicit total that
/// takes precedence over the sum of the individual counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    /// Explicit total token count.
    #[serde(default, rename = "tokens", skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// Cost in USD, when the CLI reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl Usage {
    /// Total tokens: the explicit total if reported, otherwise the sum of
    /// all counters.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total_tokens.unwrap_or_else(|| {
            self.input_tokens
                + self.output_tokens
                + self.cache_creation_input_tokens
                + self.cache_read_input_tokens
        })
    }

    /// Returns true if nothing has been counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0 && self.cost_usd.is_none()
    }

    /// Add another usage report into this one.
    pub fn accumulate(&mut self, other: &Usage) {
        let explicit = self.total_tokens.is_some() || other.total_tokens.is_some();
        let total = self.total().saturating_add(other.total());

        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_creation_input_tokens = self
            .cache_creation_input_tokens
            .saturating_add(other.cache_creation_input_tokens);
        self.cache_read_input_tokens = self
            .cache_read_input_tokens
            .saturating_add(other.cache_read_input_tokens);
        self.total_tokens = explicit.then_some(total);
        self.cost_usd = match (self.cost_usd, other.cost_usd) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
    }
}

/// System record data (session initialization and housekeeping).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemRecord {
    /// Record subtype (e.g., "init").
    #[serde(default)]
    pub subtype: Option<String>,
    /// Session identifier.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Model in use for this session.
    #[serde(default)]
    pub model: Option<String>,
    /// Working directory of the CLI.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Tools available to this session.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Permission mode the CLI is running under.
    #[serde(default, rename = "permissionMode")]
    pub permission_mode: Option<String>,
}

/// A content block inside an assistant or user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: Option<String>,
    },
    RedactedThinking {
        #[serde(default)]
        data: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
}

/// Assistant message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Message identifier, shared by every envelope of one API message.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// User message content: plain text or content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// User message payload. Claude Code reports tool results this way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: UserContent,
}

/// Content delta types for streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    /// Text content delta.
    TextDelta {
        /// The text fragment.
        text: String,
    },
    /// JSON input delta (for tool inputs).
    InputJsonDelta {
        /// Partial JSON string.
        partial_json: String,
    },
    /// Extended thinking delta.
    ThinkingDelta { thinking: String },
    /// Thinking signature delta.
    SignatureDelta { signature: String },
}

/// Partial-message events, emitted with `--include-partial-messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartialEvent {
    /// Message start marker.
    MessageStart {
        #[serde(default)]
        message: serde_json::Value,
    },
    /// Content block start marker.
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    /// Streaming content delta.
    ContentBlockDelta { index: usize, delta: ContentDelta },
    /// Content block end marker.
    ContentBlockStop { index: usize },
    /// Message-level delta carrying stop reason and usage.
    MessageDelta {
        #[serde(default)]
        delta: serde_json::Value,
        #[serde(default)]
        usage: Option<Usage>,
    },
    /// Message end marker.
    MessageStop,
}

/// Final result record data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Result subtype (e.g., "success", "`error_max_turns`").
    pub subtype: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Whether an error occurred.
    #[serde(default)]
    pub is_error: bool,
    /// Final result text, or the error message when `is_error` is set.
    #[serde(default)]
    pub result: Option<String>,
    /// Total cost in USD.
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Why a flat `done` record ended the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
    Other,
}

impl FinishReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::Other => "other",
        }
    }
}

/// Records emitted by Claude Code in stream-json format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CliRecord {
    /// System record (init and housekeeping).
    System(SystemRecord),
    /// Complete assistant message envelope.
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        parent_tool_use_id: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// User message envelope (tool results).
    User {
        message: UserMessage,
        #[serde(default)]
        parent_tool_use_id: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Partial message event.
    StreamEvent {
        event: PartialEvent,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Final result record.
    Result(ResultRecord),
    /// Flat text fragment.
    Text { text: String },
    /// Flat tool call announcement.
    ToolCallStart { id: String, name: String },
    /// Flat tool input fragment.
    ToolCallDelta { id: String, input_delta: String },
    /// Flat tool call end.
    ToolCallEnd { id: String },
    /// Flat tool result.
    ToolResult {
        id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    /// Flat usage report.
    Usage { usage: Usage },
    /// Flat successful end of stream.
    Done {
        #[serde(default)]
        usage: Option<Usage>,
        #[serde(default)]
        finish_reason: Option<FinishReason>,
    },
    /// Flat error reported by the CLI itself.
    Error {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
}

impl CliRecord {
    /// Returns true if this record ends the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_) | Self::Done { .. } | Self::Error { .. })
    }

    /// Returns the session ID if the record carries one.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::System(init) => init.session_id.as_deref(),
            Self::Result(result) => result.session_id.as_deref(),
            Self::Assistant { session_id, .. }
            | Self::User { session_id, .. }
            | Self::StreamEvent { session_id, .. } => session_id.as_deref(),
            _ => None,
        }
    }

    /// The wire tag of this record, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::System(_) => "system",
            Self::Assistant { .. } => "assistant",
            Self::User { .. } => "user",
            Self::StreamEvent { .. } => "stream_event",
            Self::Result(_) => "result",
            Self::Text { .. } => "text",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallDelta { .. } => "tool_call_delta",
            Self::ToolCallEnd { .. } => "tool_call_end",
            Self::ToolResult { .. } => "tool_result",
            Self::Usage { .. } => "usage",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// Render tool result content (a string or a list of text blocks) as text.
#[must_use]
pub fn tool_result_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| match item.get("text").and_then(serde_json::Value::as_str) {
                Some(text) => text.to_string(),
                None => item.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}
