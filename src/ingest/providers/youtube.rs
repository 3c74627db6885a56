// src/ingest/providers/youtube.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::error::{truncate_body, SourceError};
use crate::ingest::types::{CandidateItem, VideoSource};

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct SearchId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    #[serde(rename = "publishedAt")]
    published_at: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "channelTitle", default)]
    channel_title: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

/// YouTube Data API v3 `search.list`, one page per call.
pub struct YouTubeSource {
    client: Client,
    api_base: String,
    api_key: String,
    timeout: Duration,
}

impl YouTubeSource {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            api_key,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl VideoSource for YouTubeSource {
    async fn search_window(
        &self,
        tag: &str,
        published_after: DateTime<Utc>,
        published_before: Option<DateTime<Utc>>,
        max_results: u32,
    ) -> Result<Vec<CandidateItem>, SourceError> {
        let url = format!("{}/search", self.api_base);
        let published_after = published_after.to_rfc3339_opts(SecondsFormat::Secs, true);
        let max_results = max_results.to_string();

        let mut params = vec![
            ("part", "snippet".to_string()),
            ("q", tag.to_string()),
            ("type", "video".to_string()),
            ("order", "date".to_string()),
            ("maxResults", max_results),
            ("publishedAfter", published_after),
        ];
        if let Some(before) = published_before {
            params.push((
                "publishedBefore",
                before.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        params.push(("key", self.api_key.clone()));

        // `without_url` keeps the API key out of error messages and logs.
        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .query(&params)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.without_url()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SourceError::Unavailable(e.without_url()))?;

        if !status.is_success() {
            return Err(SourceError::Rejected {
                status: status.as_u16(),
                reason: rejection_reason(&body),
            });
        }

        parse_search_response(&body)
    }

    fn name(&self) -> &'static str {
        "youtube"
    }
}

/// Google wraps failures as `{"error": {"message", "errors": [{"reason"}]}}`.
fn rejection_reason(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => {
            let reason = env
                .error
                .errors
                .into_iter()
                .map(|e| e.reason)
                .find(|r| !r.is_empty());
            match (reason, env.error.message.is_empty()) {
                (Some(r), true) => r,
                (Some(r), false) => format!("{r}: {}", env.error.message),
                (None, _) => env.error.message,
            }
        }
        Err(_) => truncate_body(body, 300),
    }
}

pub(crate) fn parse_search_response(body: &str) -> Result<Vec<CandidateItem>, SourceError> {
    let parsed: SearchResponse =
        serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;

    let mut out = Vec::with_capacity(parsed.items.len());
    for it in parsed.items {
        let Some(video_id) = it.id.video_id.filter(|v| !v.is_empty()) else {
            tracing::debug!("search hit without a videoId, skipping");
            continue;
        };
        let published_at = match DateTime::parse_from_rfc3339(&it.snippet.published_at) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                tracing::warn!(
                    video_id = %video_id,
                    published_at = %it.snippet.published_at,
                    error = %e,
                    "unparsable publish time, skipping item"
                );
                continue;
            }
        };
        let thumbs = it.snippet.thumbnails;
        let thumbnail_url = thumbs
            .high
            .or(thumbs.medium)
            .or(thumbs.default)
            .map(|t| t.url);

        out.push(CandidateItem {
            link: CandidateItem::watch_link(&video_id),
            title: html_escape::decode_html_entities(&it.snippet.title).into_owned(),
            channel: html_escape::decode_html_entities(&it.snippet.channel_title).into_owned(),
            published_at,
            thumbnail_url,
            video_id,
        });
    }
    Ok(out)
}
