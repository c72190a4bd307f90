//! Stream parser for Claude Code stdout.
//!
//! Output arrives in arbitrary chunks. [`LineBuffer`] reassembles complete
//! newline-delimited lines, [`RecordReader`] drives it from an async reader,
//! and [`StreamParser`] turns each line into a [`CliRecord`].

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::cli::CliRecord;

/// Longest line accepted from the CLI.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Size of each read from the underlying pipe.
const READ_CHUNK: usize = 8 * 1024;

/// Longest excerpt of an offending line kept in errors.
const EXCERPT_LEN: usize = 200;

/// Error type for stream operations.
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    /// The line is not valid JSON or does not match any record shape.
    #[error("Failed to parse record: {reason}")]
    ParseError { input: String, reason: String },
    /// Well-formed JSON with a `type` tag this adapter does not know.
    #[error("Unexpected record type {record_type:?}: {reason}")]
    UnexpectedRecord { record_type: String, reason: String },
    /// A line grew past [`MAX_LINE_BYTES`] without a newline.
    #[error("Record exceeds {limit} bytes")]
    LineTooLong { limit: usize },
    /// The line is not UTF-8.
    #[error("Record is not valid UTF-8")]
    InvalidUtf8,
    /// Reading from the process failed.
    #[error("Failed to read process output: {0}")]
    Io(#[from] std::io::Error),
}

/// Truncate untrusted input for inclusion in an error message.
fn excerpt(line: &str) -> String {
    if line.len() <= EXCERPT_LEN {
        return line.to_string();
    }
    let mut end = EXCERPT_LEN;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}

/// Parser for single stream-json lines.
pub struct StreamParser;

impl StreamParser {
    /// Parse a single line of stream-json output.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::UnexpectedRecord` for valid JSON with an unknown
    /// `type`, and `StreamError::ParseError` for anything else that does not
    /// parse.
    pub fn parse_line(line: &str) -> Result<CliRecord, StreamError> {
        let line = line.trim();
        match serde_json::from_str::<CliRecord>(line) {
            Ok(record) => Ok(record),
            Err(err) => {
                let record_type = serde_json::from_str::<serde_json::Value>(line)
                    .ok()
                    .and_then(|value| {
                        value
                            .get("type")
                            .and_then(serde_json::Value::as_str)
                            .map(String::from)
                    });
                match record_type {
                    Some(record_type) if err.to_string().starts_with("unknown variant") => {
                        Err(StreamError::UnexpectedRecord {
                            record_type,
                            reason: err.to_string(),
                        })
                    }
                    _ => Err(StreamError::ParseError {
                        input: excerpt(line),
                        reason: err.to_string(),
                    }),
                }
            }
        }
    }
}

/// Reassembles newline-delimited lines from arbitrary byte chunks.
///
/// An incomplete trailing fragment is carried forward until the next chunk
/// completes it, or until [`LineBuffer::finish`] flushes it at end of input.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes, blank lines skipped.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::LineTooLong` if the pending fragment grows past
    /// [`MAX_LINE_BYTES`], or `StreamError::InvalidUtf8` for a non-UTF-8 line.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, StreamError> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];
            self.check_len()?;
            let raw = std::mem::take(&mut self.pending);
            if let Some(line) = Self::decode(raw)? {
                lines.push(line);
            }
        }

        self.pending.extend_from_slice(rest);
        self.check_len()?;
        Ok(lines)
    }

    /// Flush the unterminated trailing fragment at end of input.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::InvalidUtf8` if the fragment is not UTF-8.
    pub fn finish(&mut self) -> Result<Option<String>, StreamError> {
        let raw = std::mem::take(&mut self.pending);
        Self::decode(raw)
    }

    /// Bytes currently waiting for a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn check_len(&self) -> Result<(), StreamError> {
        if self.pending.len() > MAX_LINE_BYTES {
            return Err(StreamError::LineTooLong {
                limit: MAX_LINE_BYTES,
            });
        }
        Ok(())
    }

    fn decode(mut raw: Vec<u8>) -> Result<Option<String>, StreamError> {
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        let line = String::from_utf8(raw).map_err(|_| StreamError::InvalidUtf8)?;
        if line.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }
}

/// Incremental line reader over a process output pipe.
pub struct RecordReader<R> {
    reader: R,
    buffer: LineBuffer,
    ready: std::collections::VecDeque<String>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: LineBuffer::new(),
            ready: std::collections::VecDeque::new(),
            eof: false,
        }
    }

    /// Wait for the next complete line; `None` at end of input.
    ///
    /// Cancel-safe: a line is only removed from the internal queue when it is
    /// returned, and partially read data stays in the buffer.
    ///
    /// # Errors
    ///
    /// Returns a `StreamError` if reading fails or a line is unusable.
    pub async fn next_line(&mut self) -> Result<Option<String>, StreamError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }
            if self.eof {
                return Ok(None);
            }

            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                self.eof = true;
                if let Some(line) = self.buffer.finish()? {
                    self.ready.push_back(line);
                }
            } else {
                self.ready.extend(self.buffer.push(&chunk[..n])?);
            }
        }
    }

    /// Wait for the next line and parse it.
    ///
    /// # Errors
    ///
    /// Returns a `StreamError` if reading or parsing fails.
    pub async fn next_record(&mut self) -> Result<Option<(String, CliRecord)>, StreamError> {
        match self.next_line().await? {
            Some(line) => {
                let record = StreamParser::parse_line(&line)?;
                Ok(Some((line, record)))
            }
            None => Ok(None),
        }
    }
}
