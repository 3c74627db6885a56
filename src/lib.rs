// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod store;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::config::Config;
pub use crate::error::{RunAborted, RunError, SinkError, SourceError, StorageError};
pub use crate::ingest::providers::YouTubeSource;
pub use crate::ingest::types::{CandidateItem, VideoSource};
pub use crate::ingest::{Poller, PollerSettings, RunPhase, RunReport};
pub use crate::notify::{Notifier, SlackNotifier};
pub use crate::store::{Backlog, MemoryStateStore, SqliteStateStore, StateStore};
