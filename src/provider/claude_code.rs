//! Request front door.
//!
//! [`ClaudeCodeProvider`] validates a request, waits for a process slot,
//! spawns the CLI, and hands the process to a [`RequestRun`] task. The
//! caller gets a [`GenerationStream`], or a [`GenerationResult`] when the
//! stream is drained by [`ClaudeCodeProvider::generate`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;
use uuid::Uuid;

use crate::cli::ClaudeProcess;
use crate::config::{validate_concurrency, validate_settings, InputMode, ProviderConfig};
use crate::provider::{
    classify_spawn, AcquireError, ClassifiedError, ErrorKind, GenerationRequest,
    GenerationResult, RequestRun, RunParams, SlotPool, StreamEvent, DEFAULT_CHANNEL_BUFFER,
};

/// Errors returned by the front door.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ProviderError {
    /// Settings failed validation; no process was started.
    #[error("Invalid settings: {}", .errors.join("; "))]
    InvalidSettings { errors: Vec<String> },
    /// Provider configuration was rejected at construction.
    #[error("Invalid provider config: {0}")]
    InvalidConfig(String),
    /// The request ended with a classified error.
    #[error(transparent)]
    Generation(#[from] ClassifiedError),
}

impl ProviderError {
    /// The classified kind, if the request got past validation.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::InvalidSettings { .. } | Self::InvalidConfig(_) => None,
            Self::Generation(err) => Some(err.kind),
        }
    }
}

/// Ordered events of one request, ending with exactly one finish or error.
///
/// Dropping the stream terminates the process.
pub struct GenerationStream {
    request_id: Uuid,
    inner: ReceiverStream<StreamEvent>,
}

impl GenerationStream {
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Drain the stream into a [`GenerationResult`].
    ///
    /// # Errors
    ///
    /// Returns the classified error if the stream ended with one.
    pub async fn collect_result(mut self) -> Result<GenerationResult, ClassifiedError> {
        let mut result = GenerationResult::default();
        let mut failure = None;
        while let Some(event) = self.next().await {
            if let Err(err) = result.apply(event) {
                failure = Some(err);
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }
}

impl futures_core::Stream for GenerationStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Provider running one Claude Code process per request.
#[derive(Debug, Clone)]
pub struct ClaudeCodeProvider {
    config: Arc<ProviderConfig>,
    pool: Arc<SlotPool>,
}

impl ClaudeCodeProvider {
    /// Create a provider with its own pool sized from the config.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `max_concurrent_processes` is zero.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        if let Some(reason) = validate_concurrency(config.max_concurrent_processes) {
            return Err(ProviderError::InvalidConfig(reason));
        }
        let pool = Arc::new(SlotPool::from_limit(config.max_concurrent_processes));
        Ok(Self::with_pool(config, pool))
    }

    /// Create a provider sharing an existing pool.
    #[must_use]
    pub fn with_pool(config: ProviderConfig, pool: Arc<SlotPool>) -> Self {
        Self {
            config: Arc::new(config),
            pool,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<SlotPool> {
        &self.pool
    }

    /// Run a request and return its event stream.
    ///
    /// Validation, queueing for a slot, and spawning all happen before this
    /// returns, so their failures are reported here rather than in the
    /// stream.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::InvalidSettings` if validation fails, or a
    /// classified error if the request is cancelled while queued or the
    /// process cannot be spawned.
    pub async fn stream(&self, request: GenerationRequest) -> Result<GenerationStream, ProviderError> {
        let request_id = Uuid::new_v4();
        let mut request = request;
        if request.model.trim().is_empty() {
            request.model.clone_from(&self.config.default_model);
        }
        let span = tracing::info_span!("generation", %request_id, model = %request.model);

        let rx = self.start(request).instrument(span).await?;
        Ok(GenerationStream {
            request_id,
            inner: ReceiverStream::new(rx),
        })
    }

    /// Run a request to completion and return the concatenated result.
    ///
    /// # Errors
    ///
    /// Returns any error `stream` returns, or the classified error that
    /// ended the stream.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult, ProviderError> {
        let stream = self.stream(request).await?;
        Ok(stream.collect_result().await?)
    }

    async fn start(
        &self,
        request: GenerationRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let settings = request.settings.clone().with_defaults(&self.config.defaults);

        let report = validate_settings(&request.model, &settings);
        for warning in &report.warnings {
            tracing::warn!(%warning, "Settings warning");
        }
        if !report.is_valid() {
            tracing::warn!(errors = ?report.errors, "Rejecting request with invalid settings");
            return Err(ProviderError::InvalidSettings {
                errors: report.errors,
            });
        }

        tracing::debug!(
            in_use = self.pool.in_use(),
            waiting = self.pool.waiting(),
            "Waiting for process slot"
        );
        let slot = self.pool.acquire(&request.cancel).await.map_err(|err| match err {
            AcquireError::Cancelled => ClassifiedError::cancelled(),
            AcquireError::Closed => {
                ClassifiedError::new(ErrorKind::ApiCallError, "Provider is shut down")
            }
        })?;

        let builder = request.process_builder(&settings);
        let process = ClaudeProcess::spawn_with_binary(&self.config.executable, &builder)
            .map_err(|err| {
                tracing::error!(
                    executable = %self.config.executable,
                    error = %err,
                    "Failed to spawn Claude process"
                );
                classify_spawn(&err)
            })?;
        tracing::info!(pid = ?process.id(), "Claude process spawned");

        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_BUFFER);
        let params = RunParams {
            cancel: request.cancel.clone(),
            timeout: settings.timeout(),
            kill_grace: settings.kill_grace(),
            input: request.stdin_payload(settings.input_mode()),
            hold_input_open: settings.input_mode() == InputMode::StreamJson,
        };
        let run = RequestRun::start(process, slot, tx, params);
        tokio::spawn(run.drive().in_current_span());

        Ok(rx)
    }
}
