// src/ingest/types.rs
use chrono::{DateTime, Utc};

use crate::error::SourceError;

/// One search hit, alive for a single run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CandidateItem {
    pub video_id: String,
    pub title: String,
    pub channel: String,
    pub published_at: DateTime<Utc>,
    pub link: String,
    pub thumbnail_url: Option<String>,
}

impl CandidateItem {
    pub fn watch_link(video_id: &str) -> String {
        format!("https://www.youtube.com/watch?v={video_id}")
    }
}

/// Search side of the bridge. Implementations return items in the order the
/// remote service ranked them (newest first); callers must not reorder.
#[async_trait::async_trait]
pub trait VideoSource: Send + Sync {
    /// One page of hits published at or after `published_after` and, when
    /// given, at or before `published_before`.
    async fn search_window(
        &self,
        tag: &str,
        published_after: DateTime<Utc>,
        published_before: Option<DateTime<Utc>>,
        max_results: u32,
    ) -> Result<Vec<CandidateItem>, SourceError>;

    async fn search(
        &self,
        tag: &str,
        published_after: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<CandidateItem>, SourceError> {
        self.search_window(tag, published_after, None, max_results)
            .await
    }

    fn name(&self) -> &'static str;
}
