// src/ingest/scheduler.rs
use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::ingest::{types::VideoSource, Poller};
use crate::notify::Notifier;
use crate::store::StateStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub runs: u64,
    pub aborted: u64,
}

/// Run the poller every `interval` until `shutdown` resolves.
///
/// Each run is awaited to completion before the next tick is taken, so runs
/// never overlap. Shutdown is only observed between runs; a run in flight
/// always finishes its delivery loop.
pub async fn run_every<S, V, N, F>(
    poller: &Poller<S, V, N>,
    interval: Duration,
    shutdown: F,
) -> SchedulerStats
where
    S: StateStore,
    V: VideoSource,
    N: Notifier,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = SchedulerStats::default();

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!(runs = stats.runs, "shutdown requested, stopping");
                break;
            }
            _ = ticker.tick() => {}
        }

        stats.runs += 1;
        match poller.run_once().await {
            Ok(report) => {
                tracing::debug!(delivered = report.delivered, "scheduled run done");
            }
            Err(e) => {
                stats.aborted += 1;
                tracing::error!(error = %e, "scheduled run aborted; next tick will retry");
            }
        }
    }

    stats
}
