use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("tagwatch_runs_total", "Completed runs, labelled by outcome.");
        describe_counter!(
            "tagwatch_items_fetched_total",
            "Items returned by the source query."
        );
        describe_counter!(
            "tagwatch_items_backfilled_total",
            "Items returned by backlog queries for windows a full page left unread."
        );
        describe_counter!(
            "tagwatch_items_new_total",
            "Items not yet in the seen-set, including ledger retries."
        );
        describe_counter!(
            "tagwatch_items_delivered_total",
            "Items acknowledged by the sink."
        );
        describe_counter!(
            "tagwatch_delivery_failures_total",
            "Delivery attempts the sink failed or rejected."
        );
        describe_counter!(
            "tagwatch_retries_abandoned_total",
            "Items that exhausted their delivery attempts."
        );
        describe_counter!(
            "tagwatch_seen_pruned_total",
            "Seen-set ids pruned behind the retention horizon."
        );
        describe_counter!(
            "tagwatch_ledger_pruned_total",
            "Abandoned retry ledger entries pruned behind the retention horizon."
        );
        describe_gauge!("tagwatch_backlog_open", "1 while a backlog window awaits draining.");
        describe_gauge!("tagwatch_last_run_ts", "Unix ts when the last run finished.");
        describe_gauge!("tagwatch_watermark_ts", "Unix ts of the persisted watermark.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already set.
    pub fn init() -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
