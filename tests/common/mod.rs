// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tagwatch::store::{LedgerEntry, PendingRetry};
use tagwatch::{
    Backlog, CandidateItem, MemoryStateStore, Notifier, SinkError, SourceError, StateStore,
    StorageError, VideoSource,
};

pub fn ts(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 6, h, m, 0).unwrap()
}

pub fn item(id: &str, published_at: DateTime<Utc>) -> CandidateItem {
    CandidateItem {
        video_id: id.to_string(),
        title: format!("video {id}"),
        channel: "Orpheus".to_string(),
        published_at,
        link: CandidateItem::watch_link(id),
        thumbnail_url: Some(format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg")),
    }
}

/// Serves queued pages in order; an empty page once the script runs out.
#[derive(Default)]
pub struct ScriptedSource {
    pages: Mutex<VecDeque<Result<Vec<CandidateItem>, SourceError>>>,
    queries: Mutex<Vec<(DateTime<Utc>, Option<DateTime<Utc>>)>>,
    delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_page(&self, page: Vec<CandidateItem>) {
        self.pages.lock().unwrap().push_back(Ok(page));
    }

    pub fn push_error(&self, err: SourceError) {
        self.pages.lock().unwrap().push_back(Err(err));
    }

    /// `published_after` of every query, in call order.
    pub fn queries(&self) -> Vec<DateTime<Utc>> {
        self.windows().into_iter().map(|(after, _)| after).collect()
    }

    /// `(published_after, published_before)` of every query, in call order.
    pub fn windows(&self) -> Vec<(DateTime<Utc>, Option<DateTime<Utc>>)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoSource for ScriptedSource {
    async fn search_window(
        &self,
        _tag: &str,
        published_after: DateTime<Utc>,
        published_before: Option<DateTime<Utc>>,
        max_results: u32,
    ) -> Result<Vec<CandidateItem>, SourceError> {
        self.queries
            .lock()
            .unwrap()
            .push((published_after, published_before));
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let next = self.pages.lock().unwrap().pop_front();
        match next {
            Some(Ok(mut page)) => {
                page.truncate(max_results as usize);
                Ok(page)
            }
            Some(Err(e)) => Err(e),
            None => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// A fixed catalogue searched like the real API: inclusive window, newest
/// first, cut to the page size.
pub struct WindowSource {
    catalogue: Mutex<Vec<CandidateItem>>,
}

impl WindowSource {
    pub fn new(items: Vec<CandidateItem>) -> Self {
        Self {
            catalogue: Mutex::new(items),
        }
    }

    pub fn publish(&self, item: CandidateItem) {
        self.catalogue.lock().unwrap().push(item);
    }
}

#[async_trait]
impl VideoSource for WindowSource {
    async fn search_window(
        &self,
        _tag: &str,
        published_after: DateTime<Utc>,
        published_before: Option<DateTime<Utc>>,
        max_results: u32,
    ) -> Result<Vec<CandidateItem>, SourceError> {
        let mut hits: Vec<CandidateItem> = self
            .catalogue
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.published_at >= published_after)
            .filter(|i| published_before.map_or(true, |b| i.published_at <= b))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        hits.truncate(max_results as usize);
        Ok(hits)
    }

    fn name(&self) -> &'static str {
        "window"
    }
}

/// Store operations `FailingStore` can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    LoadWatermark,
    SetWatermark,
    HasSeen,
    MarkSeen,
    RecordFailure,
    SetBacklog,
}

/// A `MemoryStateStore` whose chosen operation returns a database error.
pub struct FailingStore {
    inner: MemoryStateStore,
    fail_on: Mutex<Option<StoreOp>>,
}

impl FailingStore {
    pub fn new(inner: MemoryStateStore) -> Self {
        Self {
            inner,
            fail_on: Mutex::new(None),
        }
    }

    pub fn fail_on(&self, op: StoreOp) {
        *self.fail_on.lock().unwrap() = Some(op);
    }

    pub fn inner(&self) -> &MemoryStateStore {
        &self.inner
    }

    fn check(&self, op: StoreOp) -> Result<(), StorageError> {
        if *self.fail_on.lock().unwrap() == Some(op) {
            return Err(StorageError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FailingStore {
    async fn stored_watermark(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        self.check(StoreOp::LoadWatermark)?;
        self.inner.stored_watermark().await
    }

    async fn set_watermark(&self, ts: DateTime<Utc>) -> Result<(), StorageError> {
        self.check(StoreOp::SetWatermark)?;
        self.inner.set_watermark(ts).await
    }

    async fn has_seen(&self, video_id: &str) -> Result<bool, StorageError> {
        self.check(StoreOp::HasSeen)?;
        self.inner.has_seen(video_id).await
    }

    async fn mark_seen(
        &self,
        video_id: &str,
        published_at: DateTime<Utc>,
        announced_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.check(StoreOp::MarkSeen)?;
        self.inner.mark_seen(video_id, published_at, announced_at).await
    }

    async fn record_failure(
        &self,
        item: &CandidateItem,
        reason: &str,
        max_attempts: u32,
        failed_at: DateTime<Utc>,
    ) -> Result<LedgerEntry, StorageError> {
        self.check(StoreOp::RecordFailure)?;
        self.inner
            .record_failure(item, reason, max_attempts, failed_at)
            .await
    }

    async fn pending_retries(&self, limit: u32) -> Result<Vec<PendingRetry>, StorageError> {
        self.inner.pending_retries(limit).await
    }

    async fn prune_seen(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        self.inner.prune_seen(before).await
    }

    async fn prune_ledger(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        self.inner.prune_ledger(before).await
    }

    async fn backlog(&self) -> Result<Option<Backlog>, StorageError> {
        self.inner.backlog().await
    }

    async fn set_backlog(&self, backlog: Option<Backlog>) -> Result<(), StorageError> {
        self.check(StoreOp::SetBacklog)?;
        self.inner.set_backlog(backlog).await
    }
}

/// Records every call; rejects ids registered with `fail_for`.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn recover(&self, id: &str) {
        self.failing.lock().unwrap().remove(id);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, item: &CandidateItem) -> Result<(), SinkError> {
        self.calls.lock().unwrap().push(item.video_id.clone());
        if self.failing.lock().unwrap().contains(&item.video_id) {
            return Err(SinkError::Rejected {
                status: 500,
                body: "no_service".to_string(),
            });
        }
        Ok(())
    }
}

/// Serve `router` on an ephemeral localhost port.
pub async fn spawn_server(router: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}
