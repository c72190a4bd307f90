//! Per-request process lifecycle.
//!
//! A [`RequestRun`] owns one spawned CLI process, its slot, and the sending
//! half of the event channel. It streams records while racing the caller's
//! cancellation token, the request deadline, and the caller dropping the
//! stream, then terminates and reaps the process, emits exactly one terminal
//! event, and releases the slot before closing the channel.

use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cli::{ClaudeProcess, RecordReader, StreamError};
use crate::provider::{
    classify_exit, ClassifiedError, ErrorKind, ErrorMetadata, EventTranslator, Slot,
    StderrTail, StreamEvent,
};

/// Default buffer size for the event channel.
pub const DEFAULT_CHANNEL_BUFFER: usize = 64;

/// Longest wait for the stderr reader once the process is gone.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest stderr line buffered at once; longer lines are split.
const MAX_STDERR_LINE_BYTES: u64 = 64 * 1024;

/// Exactly-once guard for terminal events.
#[derive(Debug, Default)]
pub struct TerminalLatch(AtomicBool);

impl TerminalLatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true for the first caller only.
    pub fn try_fire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Sending half of a request's event stream.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    latch: TerminalLatch,
}

impl EventSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            tx,
            latch: TerminalLatch::new(),
        }
    }

    /// Deliver an event. Returns false if the receiver is gone.
    ///
    /// Terminal events pass through the latch; any event after the first
    /// terminal one is dropped.
    pub async fn send(&self, event: StreamEvent) -> bool {
        if self.latch.is_fired() {
            tracing::debug!(?event, "Dropping event after terminal event");
            return !self.tx.is_closed();
        }
        if event.is_terminal() && !self.latch.try_fire() {
            tracing::debug!(?event, "Dropping duplicate terminal event");
            return !self.tx.is_closed();
        }
        self.tx.send(event).await.is_ok()
    }

    /// Resolves once the receiver has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

/// Why the streaming loop stopped.
#[derive(Debug)]
enum Stop {
    /// The record stream produced its finish event.
    Finished(StreamEvent),
    /// The record stream reported an error itself.
    Reported(ClassifiedError),
    Cancelled,
    TimedOut,
    /// The caller dropped the stream.
    Abandoned,
    Failed(ClassifiedError),
    /// Stdout closed without a terminal record.
    Eof,
}

/// What a request is started with.
pub struct RunParams {
    pub cancel: CancellationToken,
    pub timeout: Duration,
    pub kill_grace: Duration,
    /// Bytes written to stdin.
    pub input: Vec<u8>,
    /// Keep stdin open until the terminal record arrives.
    pub hold_input_open: bool,
}

/// One request's process from spawn to release.
pub struct RequestRun {
    process: ClaudeProcess,
    slot: Slot,
    sink: EventSink,
    params: RunParams,
    input_done: CancellationToken,
    input_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<StderrTail>>,
    translator: EventTranslator,
}

impl RequestRun {
    /// Take over a freshly spawned process and start feeding it input.
    #[must_use]
    pub fn start(
        mut process: ClaudeProcess,
        slot: Slot,
        tx: mpsc::Sender<StreamEvent>,
        mut params: RunParams,
    ) -> Self {
        let input_done = CancellationToken::new();
        let input = std::mem::take(&mut params.input);
        let input_task = process.take_stdin().map(|stdin| {
            let hold = params.hold_input_open.then(|| input_done.clone());
            tokio::spawn(write_input(stdin, input, hold))
        });
        let stderr_task = process.take_stderr().map(|stderr| tokio::spawn(collect_stderr(stderr)));

        Self {
            process,
            slot,
            sink: EventSink::new(tx),
            params,
            input_done,
            input_task,
            stderr_task,
            translator: EventTranslator::new(),
        }
    }

    /// Drive the request to completion.
    pub async fn drive(mut self) {
        let stop = self.stream().await;
        self.input_done.cancel();

        match stop {
            Stop::Finished(event) => {
                self.sink.send(event).await;
                let status = self.reap().await;
                tracing::info!(
                    exit_code = ?status.as_ref().and_then(ExitStatus::code),
                    usage = ?self.translator.usage(),
                    "Generation finished"
                );
            }
            Stop::Reported(error) => {
                let status = self.reap().await;
                self.fail(error, status.as_ref()).await;
            }
            Stop::Cancelled => {
                let status = self.terminate().await;
                self.fail(ClassifiedError::cancelled(), status.as_ref()).await;
            }
            Stop::TimedOut => {
                let status = self.terminate().await;
                self.fail(ClassifiedError::timeout(self.params.timeout), status.as_ref())
                    .await;
            }
            Stop::Abandoned => {
                tracing::info!("Stream dropped by caller, terminating process");
                self.terminate().await;
            }
            Stop::Failed(error) => {
                let status = self.terminate().await;
                self.fail(error, status.as_ref()).await;
            }
            Stop::Eof => self.finish_after_eof().await,
        }

        if let Some(task) = self.input_task.take() {
            task.abort();
        }
        // Release before the channel closes: a drained stream implies a free slot.
        let Self { slot, sink, .. } = self;
        drop(slot);
        drop(sink);
    }

    /// Read records until something ends the request.
    async fn stream(&mut self) -> Stop {
        let Some(stdout) = self.process.take_stdout() else {
            return Stop::Failed(ClassifiedError::new(
                ErrorKind::ApiCallError,
                "Claude Code stdout not available",
            ));
        };
        let mut reader = RecordReader::new(stdout);
        let deadline = tokio::time::sleep(self.params.timeout);
        tokio::pin!(deadline);

        loop {
            let next = tokio::select! {
                biased;

                () = self.params.cancel.cancelled() => return Stop::Cancelled,
                () = &mut deadline => return Stop::TimedOut,
                () = self.sink.closed() => return Stop::Abandoned,
                next = reader.next_record() => next,
            };

            let record = match next {
                Ok(Some((_, record))) => record,
                Ok(None) => return Stop::Eof,
                Err(err) => return Stop::Failed(stream_failure(&err)),
            };
            tracing::trace!(record = record.kind(), "Record received");

            let events = match self.translator.translate(record) {
                Ok(events) => events,
                Err(violation) => {
                    return Stop::Failed(ClassifiedError::protocol(violation.to_string()));
                }
            };

            for event in events {
                if event.is_terminal() {
                    return match event {
                        StreamEvent::Error { error } => Stop::Reported(error),
                        finish => Stop::Finished(finish),
                    };
                }
                let delivered = tokio::select! {
                    biased;

                    () = self.params.cancel.cancelled() => return Stop::Cancelled,
                    () = &mut deadline => return Stop::TimedOut,
                    delivered = self.sink.send(event) => delivered,
                };
                if !delivered {
                    return Stop::Abandoned;
                }
            }
        }
    }

    /// Stdout closed: wait for the exit status, still honoring cancel and
    /// the deadline, then classify it.
    async fn finish_after_eof(&mut self) {
        // A process that closed stdout gets the grace period to exit.
        let wait = tokio::select! {
            biased;

            () = self.params.cancel.cancelled() => None,
            status = tokio::time::timeout(self.params.kill_grace, self.process.wait()) => Some(status),
        };

        let (status, error) = match wait {
            None => {
                let status = self.terminate().await;
                (status, ClassifiedError::cancelled())
            }
            Some(Ok(Ok(status))) => {
                let tail = self.stderr_tail().await;
                let error = classify_exit(
                    status.code(),
                    exit_signal(&status),
                    &tail,
                    self.translator.session_id(),
                );
                (Some(status), error)
            }
            Some(Ok(Err(err))) => (
                None,
                ClassifiedError::new(
                    ErrorKind::ApiCallError,
                    format!("Failed to wait for Claude Code: {err}"),
                ),
            ),
            Some(Err(_)) => {
                tracing::warn!("Process closed stdout but did not exit");
                let status = self.terminate().await;
                (
                    status,
                    ClassifiedError::protocol("Claude Code closed its output without a result"),
                )
            }
        };
        self.fail(error, status.as_ref()).await;
    }

    /// Emit a terminal error with diagnostics attached.
    async fn fail(&mut self, error: ClassifiedError, status: Option<&ExitStatus>) {
        let tail = self.stderr_tail().await;
        let metadata = ErrorMetadata {
            exit_code: status.and_then(ExitStatus::code),
            signal: status.and_then(exit_signal),
            stderr_tail: (!tail.is_empty()).then_some(tail),
            session_id: self.translator.session_id().map(String::from),
        };
        let error = error.with_metadata(metadata);
        tracing::warn!(
            kind = %error.kind,
            message = %error.message,
            exit_code = ?error.metadata.exit_code,
            "Generation failed"
        );
        self.sink.send(StreamEvent::Error { error }).await;
    }

    /// Wait for a natural exit within the grace period, then force it.
    async fn reap(&mut self) -> Option<ExitStatus> {
        match tokio::time::timeout(self.params.kill_grace, self.process.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "Failed to wait for Claude process");
                None
            }
            Err(_) => {
                tracing::debug!("Process still running after its result, terminating");
                self.terminate().await
            }
        }
    }

    /// SIGTERM, then SIGKILL after the grace period. No-op once exited.
    async fn terminate(&mut self) -> Option<ExitStatus> {
        let pid = self.process.id();
        match self.process.graceful_terminate(self.params.kill_grace).await {
            Ok(status) => {
                tracing::debug!(?pid, ?status, "Process terminated");
                Some(status)
            }
            Err(err) => {
                tracing::warn!(?pid, error = %err, "Failed to terminate Claude process");
                None
            }
        }
    }

    /// Collected stderr; empty if the reader is still blocked.
    async fn stderr_tail(&mut self) -> String {
        let Some(task) = self.stderr_task.take() else {
            return String::new();
        };
        match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await {
            Ok(Ok(tail)) => tail.text(),
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "Stderr reader failed");
                String::new()
            }
            Err(_) => {
                tracing::debug!("Stderr still open after process exit");
                String::new()
            }
        }
    }
}

fn stream_failure(err: &StreamError) -> ClassifiedError {
    match err {
        StreamError::Io(io) => ClassifiedError::new(
            ErrorKind::ApiCallError,
            format!("Failed to read Claude Code output: {io}"),
        ),
        StreamError::ParseError { input, reason } => {
            ClassifiedError::protocol(format!("malformed record {input:?}: {reason}"))
        }
        other => ClassifiedError::protocol(other.to_string()),
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Write the prompt, then close stdin (or hold it until `hold` fires).
async fn write_input(mut stdin: ChildStdin, input: Vec<u8>, hold: Option<CancellationToken>) {
    if let Err(err) = stdin.write_all(&input).await {
        tracing::debug!(error = %err, "Failed to write prompt to Claude stdin");
        return;
    }
    if let Err(err) = stdin.flush().await {
        tracing::debug!(error = %err, "Failed to flush Claude stdin");
        return;
    }
    if let Some(hold) = hold {
        hold.cancelled().await;
    }
    drop(stdin);
}

/// Log stderr lines and keep a bounded tail for diagnostics.
///
/// Always drains to EOF. Undecodable bytes are replaced.
async fn collect_stderr(stderr: ChildStderr) -> StderrTail {
    let mut tail = StderrTail::new();
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match (&mut reader)
            .take(MAX_STDERR_LINE_BYTES)
            .read_until(b'\n', &mut buf)
            .await
        {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                tracing::debug!(target: "claude_stderr", "{line}");
                tail.push(line);
            }
            Err(err) => {
                tracing::debug!(error = %err, "Stderr read failed");
                break;
            }
        }
    }
    tail
}
