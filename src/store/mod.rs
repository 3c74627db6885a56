// src/store/mod.rs
//! Durable run state: the watermark, the seen-set, the retry ledger and the
//! backlog left behind by full result pages.
//!
//! The store assumes a single writer. Runs are serialized by whoever invokes
//! them (cron cadence, or the in-process scheduler).

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::StorageError;
use crate::ingest::types::CandidateItem;

pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Lookback used when no watermark has ever been persisted.
pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// State of a failed item in the retry ledger after recording a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub attempts: u32,
    pub abandoned: bool,
}

/// A previously failed item still eligible for another delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRetry {
    pub item: CandidateItem,
    pub attempts: u32,
    pub last_error: String,
}

/// Part of an earlier query window that a full page could not return.
///
/// Bounds are inclusive, matching `publishedAfter`/`publishedBefore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backlog {
    pub published_after: DateTime<Utc>,
    pub published_before: DateTime<Utc>,
}

impl Backlog {
    /// Smallest window covering both. Anything already announced in between
    /// is filtered by the seen-set on the way back.
    pub fn merge(self, other: Backlog) -> Backlog {
        Backlog {
            published_after: self.published_after.min(other.published_after),
            published_before: self.published_before.max(other.published_before),
        }
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// The persisted watermark, if any run has completed.
    async fn stored_watermark(&self) -> Result<Option<DateTime<Utc>>>;

    /// The persisted watermark, or `now - 24h` when none exists yet.
    async fn get_watermark(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        Ok(self
            .stored_watermark()
            .await?
            .unwrap_or(now - Duration::hours(DEFAULT_LOOKBACK_HOURS)))
    }

    /// Replace the watermark atomically.
    async fn set_watermark(&self, ts: DateTime<Utc>) -> Result<()>;

    async fn has_seen(&self, video_id: &str) -> Result<bool>;

    /// Record a confirmed delivery. Idempotent. Also clears any retry ledger
    /// entry for the same id.
    async fn mark_seen(
        &self,
        video_id: &str,
        published_at: DateTime<Utc>,
        announced_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Count a failed delivery for `item`; flags it abandoned once
    /// `max_attempts` is reached.
    async fn record_failure(
        &self,
        item: &CandidateItem,
        reason: &str,
        max_attempts: u32,
        failed_at: DateTime<Utc>,
    ) -> Result<LedgerEntry>;

    /// Non-abandoned ledger entries, oldest failure first.
    async fn pending_retries(&self, limit: u32) -> Result<Vec<PendingRetry>>;

    /// Drop seen ids published strictly before `before`. Returns rows removed.
    async fn prune_seen(&self, before: DateTime<Utc>) -> Result<u64>;

    /// Drop abandoned ledger entries whose last failure is strictly before
    /// `before`. Pending entries are kept regardless of age.
    async fn prune_ledger(&self, before: DateTime<Utc>) -> Result<u64>;

    async fn backlog(&self) -> Result<Option<Backlog>>;

    /// Replace the backlog; `None` clears it.
    async fn set_backlog(&self, backlog: Option<Backlog>) -> Result<()>;
}
