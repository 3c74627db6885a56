// src/store/memory.rs
//! In-memory `StateStore`, for tests and throwaway runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Backlog, LedgerEntry, PendingRetry, Result, StateStore};
use crate::ingest::types::CandidateItem;

#[derive(Debug, Clone)]
struct SeenRow {
    published_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct LedgerRow {
    item: CandidateItem,
    attempts: u32,
    last_error: String,
    first_failed_at: DateTime<Utc>,
    last_failed_at: DateTime<Utc>,
    abandoned: bool,
}

#[derive(Debug, Default)]
struct Inner {
    watermark: Option<DateTime<Utc>>,
    seen: HashMap<String, SeenRow>,
    ledger: HashMap<String, LedgerRow>,
    backlog: Option<Backlog>,
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_watermark(ts: DateTime<Utc>) -> Self {
        let store = Self::default();
        store.lock().watermark = Some(ts);
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-call; the data is
        // still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn seen_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().seen.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn ledger_attempts(&self, video_id: &str) -> Option<(u32, bool)> {
        self.lock()
            .ledger
            .get(video_id)
            .map(|r| (r.attempts, r.abandoned))
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn stored_watermark(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.lock().watermark)
    }

    async fn set_watermark(&self, ts: DateTime<Utc>) -> Result<()> {
        self.lock().watermark = Some(ts);
        Ok(())
    }

    async fn has_seen(&self, video_id: &str) -> Result<bool> {
        Ok(self.lock().seen.contains_key(video_id))
    }

    async fn mark_seen(
        &self,
        video_id: &str,
        published_at: DateTime<Utc>,
        _announced_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner
            .seen
            .entry(video_id.to_string())
            .or_insert(SeenRow { published_at });
        inner.ledger.remove(video_id);
        Ok(())
    }

    async fn record_failure(
        &self,
        item: &CandidateItem,
        reason: &str,
        max_attempts: u32,
        failed_at: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        let mut inner = self.lock();
        let row = inner
            .ledger
            .entry(item.video_id.clone())
            .or_insert_with(|| LedgerRow {
                item: item.clone(),
                attempts: 0,
                last_error: String::new(),
                first_failed_at: failed_at,
                last_failed_at: failed_at,
                abandoned: false,
            });
        row.attempts += 1;
        row.last_failed_at = failed_at;
        row.last_error = reason.to_string();
        row.abandoned = row.attempts >= max_attempts;
        Ok(LedgerEntry {
            attempts: row.attempts,
            abandoned: row.abandoned,
        })
    }

    async fn pending_retries(&self, limit: u32) -> Result<Vec<PendingRetry>> {
        let inner = self.lock();
        let mut rows: Vec<&LedgerRow> = inner.ledger.values().filter(|r| !r.abandoned).collect();
        rows.sort_by(|a, b| {
            a.first_failed_at
                .cmp(&b.first_failed_at)
                .then_with(|| a.item.video_id.cmp(&b.item.video_id))
        });
        Ok(rows
            .into_iter()
            .take(limit as usize)
            .map(|r| PendingRetry {
                item: r.item.clone(),
                attempts: r.attempts,
                last_error: r.last_error.clone(),
            })
            .collect())
    }

    async fn prune_seen(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.lock();
        let len_before = inner.seen.len();
        inner.seen.retain(|_, row| row.published_at >= before);
        Ok((len_before - inner.seen.len()) as u64)
    }

    async fn prune_ledger(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.lock();
        let len_before = inner.ledger.len();
        inner
            .ledger
            .retain(|_, row| !(row.abandoned && row.last_failed_at < before));
        Ok((len_before - inner.ledger.len()) as u64)
    }

    async fn backlog(&self) -> Result<Option<Backlog>> {
        Ok(self.lock().backlog)
    }

    async fn set_backlog(&self, backlog: Option<Backlog>) -> Result<()> {
        self.lock().backlog = backlog;
        Ok(())
    }
}
