//! Conversation-to-prompt formatting.

use serde::{Deserialize, Serialize};

/// Speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Flat prompt and system prompt accepted by the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptText {
    pub prompt: String,
    pub system_prompt: Option<String>,
}

/// Flatten a conversation into the CLI's prompt and system prompt.
///
/// System messages become the system prompt. A lone user turn is passed
/// verbatim; longer conversations are rendered as `Human:`/`Assistant:`
/// turns.
#[must_use]
pub fn to_prompt_text(messages: &[Message]) -> PromptText {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let turns: Vec<&Message> = messages.iter().filter(|m| m.role != Role::System).collect();

    let prompt = match turns.as_slice() {
        [only] if only.role == Role::User => only.content.clone(),
        _ => turns
            .iter()
            .map(|m| match m.role {
                Role::Assistant => format!("Assistant: {}", m.content),
                _ => format!("Human: {}", m.content),
            })
            .collect::<Vec<_>>()
            .join("\n\n"),
    };

    PromptText {
        prompt,
        system_prompt: (!system.is_empty()).then(|| system.join("\n\n")),
    }
}
