//! Claude CLI Provider - text generation backed by the Claude Code CLI.
//!
//! Each request runs one `claude` process in stream-json mode. Its records
//! are translated into an ordered stream of [`provider::StreamEvent`]s that
//! ends in exactly one finish or error.

pub mod cli;
pub mod config;
pub mod display;
pub mod provider;
