use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};

use super::Notifier;
use crate::error::{truncate_body, SinkError};
use crate::ingest::types::CandidateItem;

pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
    timeout: Duration,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Slack mrkdwn treats `&`, `<` and `>` as control characters.
fn escape_mrkdwn(s: &str) -> String {
    html_escape::encode_text(s).into_owned()
}

/// Block Kit message: linked title, channel, publish time, thumbnail, and a
/// watch button.
pub fn build_payload(item: &CandidateItem) -> Value {
    let title = escape_mrkdwn(&item.title);
    let channel = escape_mrkdwn(&item.channel);
    let published = item.published_at.format("%Y-%m-%d %H:%M:%S UTC");

    let mut section = json!({
        "type": "section",
        "text": {
            "type": "mrkdwn",
            "text": format!("*<{}|{}>*\nby {}\nPublished at: {}", item.link, title, channel, published),
        },
    });
    if let Some(thumb) = &item.thumbnail_url {
        section["accessory"] = json!({
            "type": "image",
            "image_url": thumb,
            "alt_text": "thumbnail",
        });
    }

    json!({
        "text": format!("{title} by {channel}"),
        "blocks": [
            section,
            {
                "type": "actions",
                "elements": [{
                    "type": "button",
                    "text": { "type": "plain_text", "text": "▶ Watch on YouTube" },
                    "url": item.link,
                }],
            },
        ],
    })
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, item: &CandidateItem) -> Result<(), SinkError> {
        let body = build_payload(item);

        // The webhook URL is a secret; keep it out of errors.
        let resp = self
            .client
            .post(&self.webhook_url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| SinkError::Unavailable(e.without_url()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body: truncate_body(&text, 200),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn item(thumb: Option<&str>) -> CandidateItem {
        CandidateItem {
            video_id: "abc123".into(),
            title: "Fish & <Chips>".into(),
            channel: "Orpheus".into(),
            published_at: Utc.with_ymd_and_hms(2025, 9, 6, 9, 5, 7).unwrap(),
            link: CandidateItem::watch_link("abc123"),
            thumbnail_url: thumb.map(str::to_string),
        }
    }

    #[test]
    fn section_text_is_linked_and_escaped() {
        let p = build_payload(&item(Some("https://i.ytimg.com/t.jpg")));
        let text = p["blocks"][0]["text"]["text"].as_str().unwrap();
        assert_eq!(
            text,
            "*<https://www.youtube.com/watch?v=abc123|Fish &amp; &lt;Chips&gt;>*\nby Orpheus\nPublished at: 2025-09-06 09:05:07 UTC"
        );
        assert_eq!(
            p["blocks"][0]["accessory"]["image_url"],
            "https://i.ytimg.com/t.jpg"
        );
        assert_eq!(p["blocks"][1]["elements"][0]["url"], "https://www.youtube.com/watch?v=abc123");
        assert_eq!(p["text"], "Fish &amp; &lt;Chips&gt; by Orpheus");
    }

    #[test]
    fn no_thumbnail_means_no_accessory() {
        let p = build_payload(&item(None));
        assert!(p["blocks"][0].get("accessory").is_none());
    }
}
