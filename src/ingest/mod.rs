// src/ingest/mod.rs
//! The polling run: load watermark, query, filter against the seen-set,
//! deliver in source order, persist.
//!
//! A run either reaches `Done` or aborts. Source and storage failures abort;
//! sink failures are counted per item and the loop moves on.
//!
//! The source is queried newest first, one page per window. When a page comes
//! back full, the older part of the window it could not reach is kept as a
//! [`Backlog`] and drained by later runs, so the watermark can still move to
//! the run start without dropping anything.

pub mod providers;
pub mod scheduler;
pub mod types;

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Duration, Timelike, Utc};
use metrics::{counter, gauge};
use tracing::Instrument;

use crate::error::{RunAborted, RunError};
use crate::metrics::ensure_metrics_described;
use crate::notify::Notifier;
use crate::store::{Backlog, StateStore};
use types::{CandidateItem, VideoSource};

/// Where a run is in its lifecycle. Reported in logs and in [`RunAborted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    LoadingWatermark,
    Querying,
    Filtering,
    Delivering,
    Persisting,
    Done,
    Aborted,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::LoadingWatermark => "loading watermark",
            RunPhase::Querying => "querying",
            RunPhase::Filtering => "filtering",
            RunPhase::Delivering => "delivering",
            RunPhase::Persisting => "persisting",
            RunPhase::Done => "done",
            RunPhase::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub tag: String,
    pub max_results: u32,
    /// Total attempts per item before the retry ledger gives up on it.
    pub max_delivery_attempts: u32,
    /// Seen ids published this far behind the watermark are pruned.
    /// `None` keeps them forever.
    pub seen_retention: Option<Duration>,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            tag: "#hijackhackclub".to_string(),
            max_results: 25,
            max_delivery_attempts: 5,
            seen_retention: Some(Duration::days(30)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub video_id: String,
    pub reason: String,
    pub attempts: u32,
    pub abandoned: bool,
}

/// Summary of a run that reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub published_after: DateTime<Utc>,
    /// Items the source returned, backlog page included.
    pub fetched: usize,
    /// Items returned by the backlog query.
    pub backfilled: usize,
    /// Items queued for delivery (unseen page items plus ledger retries).
    pub new: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Ledger items queued from earlier runs that were not in this page.
    pub retried: usize,
    pub abandoned: usize,
    pub pruned: u64,
    pub ledger_pruned: u64,
    pub watermark: DateTime<Utc>,
    /// Window left for the next run to drain.
    pub backlog: Option<Backlog>,
    pub failures: Vec<DeliveryFailure>,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched={} backfilled={} new={} delivered={} failed={} retried={} abandoned={} pruned={} watermark={}",
            self.fetched,
            self.backfilled,
            self.new,
            self.delivered,
            self.failed,
            self.retried,
            self.abandoned,
            self.pruned + self.ledger_pruned,
            self.watermark.to_rfc3339()
        )?;
        if let Some(b) = &self.backlog {
            write!(f, " backlog_before={}", b.published_before.to_rfc3339())?;
        }
        Ok(())
    }
}

fn abort_in<E: Into<RunError>>(phase: RunPhase) -> impl FnOnce(E) -> RunAborted {
    move |e| RunAborted {
        phase,
        error: e.into(),
    }
}

pub struct Poller<S, V, N> {
    store: S,
    source: V,
    notifier: N,
    settings: PollerSettings,
}

impl<S, V, N> Poller<S, V, N>
where
    S: StateStore,
    V: VideoSource,
    N: Notifier,
{
    pub fn new(store: S, source: V, notifier: N, settings: PollerSettings) -> Self {
        Self {
            store,
            source,
            notifier,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn source(&self) -> &V {
        &self.source
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    /// Hand the store back so the caller can close it.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Run once, starting now.
    pub async fn run_once(&self) -> Result<RunReport, RunAborted> {
        self.run_once_at(Utc::now()).await
    }

    /// Run once with an explicit start time. The start time, truncated to
    /// whole seconds, becomes the next watermark.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<RunReport, RunAborted> {
        ensure_metrics_described();
        let started_at = now.with_nanosecond(0).unwrap_or(now);
        let span = tracing::info_span!("run", started_at = %started_at.to_rfc3339());

        let result = self.execute(started_at).instrument(span).await;

        let outcome = match &result {
            Ok(_) => RunPhase::Done,
            Err(_) => RunPhase::Aborted,
        };
        counter!("tagwatch_runs_total", "outcome" => outcome.to_string()).increment(1);
        gauge!("tagwatch_last_run_ts").set(Utc::now().timestamp() as f64);
        result
    }

    async fn execute(&self, started_at: DateTime<Utc>) -> Result<RunReport, RunAborted> {
        let settings = &self.settings;

        // LOADING_WATERMARK
        let published_after = self
            .store
            .get_watermark(started_at)
            .await
            .map_err(abort_in(RunPhase::LoadingWatermark))?;
        let backlog = self
            .store
            .backlog()
            .await
            .map_err(abort_in(RunPhase::LoadingWatermark))?;
        tracing::info!(
            published_after = %published_after.to_rfc3339(),
            backlog = backlog.is_some(),
            "loaded watermark"
        );

        // QUERYING
        let page = self.query(published_after, None).await?;
        let backfill = match backlog {
            Some(b) => self.query(b.published_after, Some(b.published_before)).await?,
            None => Vec::new(),
        };
        let fetched = page.len() + backfill.len();
        let backfilled = backfill.len();
        counter!("tagwatch_items_fetched_total").increment(fetched as u64);
        counter!("tagwatch_items_backfilled_total").increment(backfilled as u64);
        tracing::info!(fetched, backfilled, "fetched results");

        let next_backlog = next_backlog(
            backlog,
            &backfill,
            published_after,
            &page,
            settings.max_results,
        );
        if let Some(b) = &next_backlog {
            tracing::warn!(
                published_after = %b.published_after.to_rfc3339(),
                published_before = %b.published_before.to_rfc3339(),
                "full result page; older hits deferred to a later run"
            );
        }

        // FILTERING
        let candidates: Vec<CandidateItem> = page.into_iter().chain(backfill).collect();
        let (queue, retried) = self
            .build_queue(candidates)
            .await
            .map_err(abort_in(RunPhase::Filtering))?;
        let new = queue.len();
        counter!("tagwatch_items_new_total").increment(new as u64);

        // DELIVERING
        let mut delivered = 0usize;
        let mut failures = Vec::new();
        for item in &queue {
            match self.notifier.notify(item).await {
                Ok(()) => {
                    self.store
                        .mark_seen(&item.video_id, item.published_at, Utc::now())
                        .await
                        .map_err(abort_in(RunPhase::Delivering))?;
                    delivered += 1;
                    counter!("tagwatch_items_delivered_total").increment(1);
                    tracing::info!(video_id = %item.video_id, title = %item.title, "posted new video");
                }
                Err(e) => {
                    let reason = e.to_string();
                    let entry = self
                        .store
                        .record_failure(item, &reason, settings.max_delivery_attempts, started_at)
                        .await
                        .map_err(abort_in(RunPhase::Delivering))?;
                    counter!("tagwatch_delivery_failures_total").increment(1);
                    if entry.abandoned {
                        counter!("tagwatch_retries_abandoned_total").increment(1);
                        tracing::error!(
                            video_id = %item.video_id,
                            attempts = entry.attempts,
                            error = %reason,
                            "delivery failed, attempts exhausted; giving up"
                        );
                    } else {
                        tracing::warn!(
                            video_id = %item.video_id,
                            attempts = entry.attempts,
                            error = %reason,
                            "delivery failed, will retry next run"
                        );
                    }
                    failures.push(DeliveryFailure {
                        video_id: item.video_id.clone(),
                        reason,
                        attempts: entry.attempts,
                        abandoned: entry.abandoned,
                    });
                }
            }
        }

        // PERSISTING
        // Backlog before watermark: a failed watermark write leaves a run that
        // re-reads the old window, never one that skips part of it.
        if next_backlog != backlog {
            self.store
                .set_backlog(next_backlog)
                .await
                .map_err(abort_in(RunPhase::Persisting))?;
        }
        gauge!("tagwatch_backlog_open").set(if next_backlog.is_some() { 1.0 } else { 0.0 });

        let watermark = published_after.max(started_at);
        self.store
            .set_watermark(watermark)
            .await
            .map_err(abort_in(RunPhase::Persisting))?;
        gauge!("tagwatch_watermark_ts").set(watermark.timestamp() as f64);

        let (pruned, ledger_pruned) = match settings.seen_retention {
            Some(retention) => {
                // Seen ids inside an open backlog window must survive until
                // it is drained.
                let oldest_window = next_backlog
                    .map_or(watermark, |b| b.published_after.min(watermark));
                let pruned = self
                    .store
                    .prune_seen(oldest_window - retention)
                    .await
                    .map_err(abort_in(RunPhase::Persisting))?;
                let ledger_pruned = self
                    .store
                    .prune_ledger(watermark - retention)
                    .await
                    .map_err(abort_in(RunPhase::Persisting))?;
                (pruned, ledger_pruned)
            }
            None => (0, 0),
        };
        if pruned > 0 {
            counter!("tagwatch_seen_pruned_total").increment(pruned);
            tracing::debug!(pruned, "pruned seen-set");
        }
        if ledger_pruned > 0 {
            counter!("tagwatch_ledger_pruned_total").increment(ledger_pruned);
            tracing::debug!(ledger_pruned, "pruned abandoned retry ledger entries");
        }

        // DONE
        let report = RunReport {
            started_at,
            published_after,
            fetched,
            backfilled,
            new,
            delivered,
            failed: failures.len(),
            retried,
            abandoned: failures.iter().filter(|f| f.abandoned).count(),
            pruned,
            ledger_pruned,
            watermark,
            backlog: next_backlog,
            failures,
        };
        tracing::info!(%report, "run complete");
        Ok(report)
    }

    async fn query(
        &self,
        published_after: DateTime<Utc>,
        published_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<CandidateItem>, RunAborted> {
        self.source
            .search_window(
                &self.settings.tag,
                published_after,
                published_before,
                self.settings.max_results,
            )
            .await
            .map_err(|e| {
                tracing::error!(
                    provider = self.source.name(),
                    backlog = published_before.is_some(),
                    error = %e,
                    "source query failed, aborting run"
                );
                abort_in(RunPhase::Querying)(e)
            })
    }

    /// Unseen page items in source order, then pending ledger retries that
    /// are not part of this page.
    async fn build_queue(
        &self,
        page: Vec<CandidateItem>,
    ) -> crate::store::Result<(Vec<CandidateItem>, usize)> {
        let mut in_page: HashSet<String> = HashSet::with_capacity(page.len());
        let mut queue = Vec::with_capacity(page.len());

        for item in page {
            if !in_page.insert(item.video_id.clone()) {
                continue;
            }
            if self.store.has_seen(&item.video_id).await? {
                tracing::trace!(video_id = %item.video_id, "already announced");
                continue;
            }
            queue.push(item);
        }

        let mut retried = 0usize;
        for pending in self.store.pending_retries(self.settings.max_results).await? {
            if in_page.contains(&pending.item.video_id)
                || self.store.has_seen(&pending.item.video_id).await?
            {
                continue;
            }
            tracing::debug!(
                video_id = %pending.item.video_id,
                attempts = pending.attempts,
                last_error = %pending.last_error,
                "retrying earlier delivery failure"
            );
            in_page.insert(pending.item.video_id.clone());
            queue.push(pending.item);
            retried += 1;
        }

        Ok((queue, retried))
    }
}

fn ceil_to_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    if ts.nanosecond() == 0 {
        return ts;
    }
    ts.with_nanosecond(0).unwrap_or(ts) + Duration::seconds(1)
}

/// Inclusive upper bound that still reaches every hit older than `items`.
fn cursor_below(items: &[CandidateItem]) -> Option<DateTime<Utc>> {
    items.iter().map(|i| i.published_at).min().map(ceil_to_second)
}

/// What the next run still has to drain.
///
/// A full backlog page narrows the backlog to its oldest hit. A full main
/// page opens a window from `published_after` up to its oldest hit. Both are
/// merged when they occur together.
fn next_backlog(
    previous: Option<Backlog>,
    backfill: &[CandidateItem],
    published_after: DateTime<Utc>,
    page: &[CandidateItem],
    max_results: u32,
) -> Option<Backlog> {
    let full = |items: &[CandidateItem]| max_results > 0 && items.len() >= max_results as usize;

    let remaining = previous.filter(|_| full(backfill)).and_then(|b| {
        let cursor = cursor_below(backfill)?;
        let published_before = if cursor < b.published_before {
            cursor
        } else {
            // A whole page shares one second; step past it.
            tracing::warn!(
                published_before = %b.published_before.to_rfc3339(),
                "backlog page did not move the cursor; skipping one second"
            );
            b.published_before - Duration::seconds(1)
        };
        Some(Backlog {
            published_after: b.published_after,
            published_before,
        })
    });

    let gap = if full(page) {
        cursor_below(page).map(|published_before| Backlog {
            published_after,
            published_before,
        })
    } else {
        None
    };

    let merged = match (remaining, gap) {
        (Some(a), Some(b)) => Some(a.merge(b)),
        (a, b) => a.or(b),
    };
    merged.filter(|b| b.published_before >= b.published_after)
}
