//! tagwatch binary entrypoint.
//! Loads configuration, opens the state database, and either runs the
//! polling pipeline once (exit status reflects DONE/ABORTED) or keeps running
//! it on an interval until Ctrl-C.

use std::process::ExitCode;

use anyhow::Context;
use tagwatch::ingest::scheduler;
use tagwatch::metrics::Metrics;
use tagwatch::{Config, Poller, SlackNotifier, SqliteStateStore, YouTubeSource};

#[tokio::main]
async fn main() -> ExitCode {
    // Before tracing, so RUST_LOG and TAGWATCH_LOG_JSON may come from `.env`.
    let dotenv = tagwatch::config::load_dotenv();
    tagwatch::telemetry::init_tracing();
    if let Some(path) = dotenv {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    match run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = ?e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cfg = Config::from_env().context("loading configuration")?;
    tracing::info!(config = ?cfg, "configuration loaded");

    let store = SqliteStateStore::open(&cfg.db_path)
        .await
        .with_context(|| format!("opening state database {}", cfg.db_path.display()))?;

    let source = YouTubeSource::new(cfg.yt_api_key.clone())
        .with_api_base(cfg.api_base.clone())
        .with_timeout(cfg.source_timeout);
    let notifier = SlackNotifier::new(cfg.slack_webhook_url.clone()).with_timeout(cfg.sink_timeout);
    let poller = Poller::new(store, source, notifier, cfg.poller_settings());

    let code = match cfg.poll_interval {
        None => match poller.run_once().await {
            Ok(report) => {
                tracing::info!(%report, "Run complete. {} new videos posted.", report.delivered);
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(phase = %e.phase, error = %e.error, "run aborted");
                ExitCode::FAILURE
            }
        },
        Some(interval) => {
            if let Some(addr) = cfg.metrics_addr {
                serve_metrics(addr).await?;
            }
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "cannot listen for Ctrl-C; stopping");
                }
            };
            let stats = scheduler::run_every(&poller, interval, shutdown).await;
            tracing::info!(runs = stats.runs, aborted = stats.aborted, "scheduler stopped");
            ExitCode::SUCCESS
        }
    };

    poller.into_store().close().await;
    Ok(code)
}

async fn serve_metrics(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let metrics = Metrics::init().context("installing Prometheus recorder")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding metrics listener on {addr}"))?;
    tracing::info!(%addr, "serving /metrics");
    let router = metrics.router();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "metrics server stopped");
        }
    });
    Ok(())
}
