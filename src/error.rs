// src/error.rs
//! Error taxonomy shared by the store, the clients and the orchestrator.
//!
//! Source and storage errors abort a run. Sink errors are per item and never
//! leave the delivery loop.

use thiserror::Error;

use crate::ingest::RunPhase;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("reading config file {path}: {reason}")]
    File { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored watermark {0:?} is not an RFC 3339 timestamp")]
    CorruptWatermark(String),
    #[error("stored backlog bound {0} is out of range")]
    CorruptBacklog(i64),
    #[error("retry ledger payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport failure or timeout.
    #[error("source unavailable: {0}")]
    Unavailable(#[source] reqwest::Error),
    /// Non-success status (quota exhaustion, bad key, ...).
    #[error("source rejected the query (HTTP {status}): {reason}")]
    Rejected { status: u16, reason: String },
    /// 2xx with a body that does not decode as a search response.
    #[error("source returned a malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(#[source] reqwest::Error),
    #[error("sink rejected the message (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Why a run ended in `ABORTED`.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// A run that stopped before `DONE`, with the phase it stopped in.
#[derive(Debug, Error)]
#[error("run aborted while {phase}: {error}")]
pub struct RunAborted {
    pub phase: RunPhase,
    #[source]
    pub error: RunError,
}

/// Cut long response bodies down before they end up in logs.
pub(crate) fn truncate_body(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}
