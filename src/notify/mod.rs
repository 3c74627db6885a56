// src/notify/mod.rs
pub mod slack;

use crate::error::SinkError;
use crate::ingest::types::CandidateItem;

pub use slack::SlackNotifier;

/// Delivers one announcement. `Ok(())` means the sink acknowledged it.
/// The poller never retries a call within a run.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, item: &CandidateItem) -> Result<(), SinkError>;
}
