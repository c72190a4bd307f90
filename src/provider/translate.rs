//! Translation of CLI records into host stream events.
//!
//! The translation is stateless apart from what ordering checks and usage
//! accounting need: the session id, running usage totals, which tool calls
//! are open or ended, and which partial-message content blocks belong to
//! which tool call.

use std::collections::{HashMap, HashSet};

use crate::cli::{
    tool_result_text, AssistantMessage, CliRecord, ContentBlock, ContentDelta, FinishReason,
    PartialEvent, ResultRecord, Usage, UserContent, UserMessage,
};
use crate::provider::{classify_error_record, ErrorMetadata, StreamEvent};

/// Out-of-order or inconsistent records.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("tool call {id} started twice")]
    DuplicateToolCall { id: String },
    #[error("tool call {id} is not open")]
    ToolCallNotOpen { id: String },
    #[error("result for tool call {id} arrived before the call ended")]
    ResultBeforeEnd { id: String },
    #[error("result for unknown tool call {id}")]
    UnknownToolResult { id: String },
    #[error("stream finished with open tool calls: {}", .ids.join(", "))]
    UnterminatedToolCalls { ids: Vec<String> },
    #[error("input delta for content block {index}, which is not a tool call")]
    UnknownContentBlock { index: usize },
}

/// Stateful record-to-event translator for one request.
#[derive(Debug, Default)]
pub struct EventTranslator {
    session_id: Option<String>,
    usage: Usage,
    usage_message_id: Option<String>,
    open_tools: HashSet<String>,
    ended_tools: HashSet<String>,
    block_tools: HashMap<usize, String>,
    partial_streaming: bool,
}

impl EventTranslator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last session id seen.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Running usage totals.
    #[must_use]
    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Translate one record into zero or more events.
    ///
    /// A terminal event, when produced, is always the last one.
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolViolation` if the record breaks tool-call ordering.
    pub fn translate(&mut self, record: CliRecord) -> Result<Vec<StreamEvent>, ProtocolViolation> {
        let mut events = Vec::new();

        if let Some(session_id) = record.session_id().filter(|id| !id.is_empty()) {
            if self.session_id.as_deref() != Some(session_id) {
                self.session_id = Some(session_id.to_string());
                events.push(StreamEvent::SessionInfo {
                    session_id: session_id.to_string(),
                });
            }
        }

        match record {
            CliRecord::System(_) => {}
            CliRecord::Assistant { message, .. } => self.assistant(message, &mut events)?,
            CliRecord::User { message, .. } => self.user(message, &mut events)?,
            CliRecord::StreamEvent { event, .. } => self.partial(event, &mut events)?,
            CliRecord::Result(result) => self.result(result, &mut events)?,
            CliRecord::Text { text } => push_text(text, &mut events),
            CliRecord::ToolCallStart { id, name } => self.start_tool(id, name, &mut events)?,
            CliRecord::ToolCallDelta { id, input_delta } => {
                self.tool_delta(id, input_delta, &mut events)?;
            }
            CliRecord::ToolCallEnd { id } => self.end_tool(id, &mut events)?,
            CliRecord::ToolResult {
                id,
                content,
                is_error,
            } => self.tool_result(id, tool_result_text(&content), is_error, &mut events)?,
            CliRecord::Usage { usage } => {
                self.usage.accumulate(&usage);
                events.push(StreamEvent::Usage {
                    usage: self.usage.clone(),
                });
            }
            CliRecord::Done {
                usage,
                finish_reason,
            } => {
                self.ensure_closed()?;
                let usage = self.final_usage(usage, None);
                events.push(StreamEvent::Finish {
                    reason: finish_reason.unwrap_or_default(),
                    usage,
                });
            }
            CliRecord::Error { message, code } => {
                let error = classify_error_record(&message, code.as_deref())
                    .with_metadata(self.metadata());
                events.push(StreamEvent::Error { error });
            }
        }

        Ok(events)
    }

    fn metadata(&self) -> ErrorMetadata {
        ErrorMetadata {
            session_id: self.session_id.clone(),
            ..Default::default()
        }
    }

    /// Final usage: the reported totals when present, else the running ones.
    fn final_usage(&mut self, reported: Option<Usage>, cost: Option<f64>) -> Usage {
        let mut usage = reported.unwrap_or_else(|| self.usage.clone());
        usage.cost_usd = cost.or(usage.cost_usd).or(self.usage.cost_usd);
        self.usage = usage.clone();
        usage
    }

    fn assistant(
        &mut self,
        message: AssistantMessage,
        events: &mut Vec<StreamEvent>,
    ) -> Result<(), ProtocolViolation> {
        for block in message.content {
            match block {
                ContentBlock::Text { text } => {
                    if !self.partial_streaming {
                        push_text(text, events);
                    }
                }
                ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {}
                ContentBlock::ToolUse { id, name, input } => {
                    let seen = self.open_tools.contains(&id) || self.ended_tools.contains(&id);
                    if seen && self.partial_streaming {
                        continue;
                    }
                    self.start_tool(id.clone(), name, events)?;
                    if !input.is_null() {
                        self.tool_delta(id.clone(), input.to_string(), events)?;
                    }
                    self.end_tool(id, events)?;
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => self.tool_result(tool_use_id, tool_result_text(&content), is_error, events)?,
            }
        }

        if let Some(usage) = message.usage {
            let repeated = message.id.is_some() && message.id == self.usage_message_id;
            if !repeated {
                self.usage_message_id = message.id;
                self.usage.accumulate(&usage);
                events.push(StreamEvent::Usage {
                    usage: self.usage.clone(),
                });
            }
        }
        Ok(())
    }

    fn user(
        &mut self,
        message: UserMessage,
        events: &mut Vec<StreamEvent>,
    ) -> Result<(), ProtocolViolation> {
        let UserContent::Blocks(blocks) = message.content else {
            return Ok(());
        };
        for block in blocks {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } = block
            {
                self.tool_result(tool_use_id, tool_result_text(&content), is_error, events)?;
            }
        }
        Ok(())
    }

    fn partial(
        &mut self,
        event: PartialEvent,
        events: &mut Vec<StreamEvent>,
    ) -> Result<(), ProtocolViolation> {
        self.partial_streaming = true;
        match event {
            PartialEvent::MessageStart { .. } => self.block_tools.clear(),
            PartialEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::ToolUse { id, name, .. } => {
                    self.start_tool(id.clone(), name, events)?;
                    self.block_tools.insert(index, id);
                }
                ContentBlock::Text { text } => push_text(text, events),
                _ => {}
            },
            PartialEvent::ContentBlockDelta { index, delta } => match delta {
                ContentDelta::TextDelta { text } => push_text(text, events),
                ContentDelta::InputJsonDelta { partial_json } => {
                    let id = self
                        .block_tools
                        .get(&index)
                        .cloned()
                        .ok_or(ProtocolViolation::UnknownContentBlock { index })?;
                    self.tool_delta(id, partial_json, events)?;
                }
                ContentDelta::ThinkingDelta { .. } | ContentDelta::SignatureDelta { .. } => {}
            },
            PartialEvent::ContentBlockStop { index } => {
                if let Some(id) = self.block_tools.remove(&index) {
                    self.end_tool(id, events)?;
                }
            }
            // Usage is taken from the complete assistant envelope.
            PartialEvent::MessageDelta { .. } | PartialEvent::MessageStop => {}
        }
        Ok(())
    }

    fn result(
        &mut self,
        result: ResultRecord,
        events: &mut Vec<StreamEvent>,
    ) -> Result<(), ProtocolViolation> {
        let usage = self.final_usage(result.usage, result.total_cost_usd);

        if result.subtype == "error_max_turns" {
            self.ensure_closed()?;
            events.push(StreamEvent::Finish {
                reason: FinishReason::Length,
                usage,
            });
        } else if result.is_error {
            let message = result.result.unwrap_or(result.subtype);
            let error = classify_error_record(&message, None).with_metadata(self.metadata());
            events.push(StreamEvent::Error { error });
        } else {
            self.ensure_closed()?;
            events.push(StreamEvent::Finish {
                reason: FinishReason::Stop,
                usage,
            });
        }
        Ok(())
    }

    fn start_tool(
        &mut self,
        id: String,
        name: String,
        events: &mut Vec<StreamEvent>,
    ) -> Result<(), ProtocolViolation> {
        if self.open_tools.contains(&id) || self.ended_tools.contains(&id) {
            return Err(ProtocolViolation::DuplicateToolCall { id });
        }
        self.open_tools.insert(id.clone());
        events.push(StreamEvent::ToolCallStart { id, name });
        Ok(())
    }

    fn tool_delta(
        &mut self,
        id: String,
        input_delta: String,
        events: &mut Vec<StreamEvent>,
    ) -> Result<(), ProtocolViolation> {
        if !self.open_tools.contains(&id) {
            return Err(ProtocolViolation::ToolCallNotOpen { id });
        }
        if !input_delta.is_empty() {
            events.push(StreamEvent::ToolCallDelta { id, input_delta });
        }
        Ok(())
    }

    fn end_tool(
        &mut self,
        id: String,
        events: &mut Vec<StreamEvent>,
    ) -> Result<(), ProtocolViolation> {
        if !self.open_tools.remove(&id) {
            return Err(ProtocolViolation::ToolCallNotOpen { id });
        }
        self.ended_tools.insert(id.clone());
        events.push(StreamEvent::ToolCallEnd { id });
        Ok(())
    }

    fn tool_result(
        &mut self,
        id: String,
        content: String,
        is_error: bool,
        events: &mut Vec<StreamEvent>,
    ) -> Result<(), ProtocolViolation> {
        if self.open_tools.contains(&id) {
            return Err(ProtocolViolation::ResultBeforeEnd { id });
        }
        if !self.ended_tools.contains(&id) {
            return Err(ProtocolViolation::UnknownToolResult { id });
        }
        events.push(StreamEvent::ToolResult {
            id,
            content,
            is_error,
        });
        Ok(())
    }

    fn ensure_closed(&self) -> Result<(), ProtocolViolation> {
        if self.open_tools.is_empty() {
            return Ok(());
        }
        let mut ids: Vec<String> = self.open_tools.iter().cloned().collect();
        ids.sort();
        Err(ProtocolViolation::UnterminatedToolCalls { ids })
    }
}

fn push_text(text: String, events: &mut Vec<StreamEvent>) {
    if !text.is_empty() {
        events.push(StreamEvent::TextDelta { text });
    }
}
