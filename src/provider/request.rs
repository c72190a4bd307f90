//! Generation requests.

use tokio_util::sync::CancellationToken;

use crate::cli::ClaudeProcessBuilder;
use crate::config::{InputMode, Settings};
use crate::provider::{to_prompt_text, Message};

/// One generation request. Moved into the provider on submission.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub settings: Settings,
    /// Fires to cancel the request at any point.
    pub cancel: CancellationToken,
}

impl GenerationRequest {
    /// Create a request with default settings and a fresh token.
    #[must_use]
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system_prompt: None,
            settings: Settings::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Create a request from a conversation.
    #[must_use]
    pub fn from_messages(model: impl Into<String>, messages: &[Message]) -> Self {
        let text = to_prompt_text(messages);
        Self {
            system_prompt: text.system_prompt,
            ..Self::new(model, text.prompt)
        }
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Use a caller-owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Process arguments for this request under resolved `settings`.
    #[must_use]
    pub fn process_builder(&self, settings: &Settings) -> ClaudeProcessBuilder {
        let mut builder = ClaudeProcessBuilder::new()
            .model(&self.model)
            .allowed_tools(&settings.allowed_tools)
            .disallowed_tools(&settings.disallowed_tools)
            .input_mode(settings.input_mode())
            .include_partial_messages(settings.partial_messages());

        if let Some(prompt) = &self.system_prompt {
            builder = builder.system_prompt(prompt);
        }
        if let Some(prompt) = &settings.append_system_prompt {
            builder = builder.append_system_prompt(prompt);
        }
        if let Some(mode) = settings.permission_mode {
            builder = builder.permission_mode(mode);
        }
        if let Some(session_id) = &settings.resume {
            builder = builder.resume(session_id);
        }
        if let Some(turns) = settings.max_turns {
            builder = builder.max_turns(turns);
        }
        if let Some(dir) = &settings.working_dir {
            builder = builder.working_dir(dir);
        }
        for dir in &settings.add_dirs {
            builder = builder.add_dir(dir);
        }
        for (key, value) in &settings.env {
            builder = builder.env(key, value);
        }
        builder
    }

    /// Bytes written to the process's stdin.
    #[must_use]
    pub fn stdin_payload(&self, mode: InputMode) -> Vec<u8> {
        match mode {
            InputMode::Text => self.prompt.clone().into_bytes(),
            InputMode::StreamJson => {
                let message = serde_json::json!({
                    "type": "user",
                    "message": {
                        "role": "user",
                        "content": [{ "type": "text", "text": self.prompt }],
                    },
                });
                let mut line = message.to_string().into_bytes();
                line.push(b'\n');
                line
            }
        }
    }
}
