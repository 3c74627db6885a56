// tests/slack_http.rs
mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{item, spawn_server, ts};
use serde_json::Value;
use tagwatch::{
    MemoryStateStore, Notifier, Poller, PollerSettings, SinkError, SlackNotifier, StateStore,
    YouTubeSource,
};

type Inbox = Arc<Mutex<Vec<Value>>>;

async fn accept(State(inbox): State<Inbox>, Json(body): Json<Value>) -> &'static str {
    inbox.lock().unwrap().push(body);
    "ok"
}

/// Accepts everything except messages whose fallback text mentions "cursed".
async fn picky(State(inbox): State<Inbox>, Json(body): Json<Value>) -> (StatusCode, &'static str) {
    let cursed = body["text"].as_str().is_some_and(|t| t.contains("cursed"));
    if cursed {
        return (StatusCode::BAD_REQUEST, "invalid_blocks");
    }
    inbox.lock().unwrap().push(body);
    (StatusCode::OK, "ok")
}

#[tokio::test]
async fn posts_block_kit_message() {
    let inbox: Inbox = Arc::default();
    let addr = spawn_server(
        Router::new()
            .route("/hook", post(accept))
            .with_state(inbox.clone()),
    )
    .await;

    let notifier = SlackNotifier::new(format!("http://{addr}/hook"));
    notifier.notify(&item("abc", ts(9, 5))).await.unwrap();

    let got = inbox.lock().unwrap().clone();
    assert_eq!(got.len(), 1);
    let blocks = got[0]["blocks"].as_array().unwrap();
    assert_eq!(blocks[0]["type"], "section");
    assert_eq!(
        blocks[0]["text"]["text"],
        "*<https://www.youtube.com/watch?v=abc|video abc>*\nby Orpheus\nPublished at: 2025-09-06 09:05:00 UTC"
    );
    assert_eq!(blocks[0]["accessory"]["alt_text"], "thumbnail");
    assert_eq!(blocks[1]["type"], "actions");
    assert_eq!(blocks[1]["elements"][0]["text"]["text"], "▶ Watch on YouTube");
}

#[tokio::test]
async fn non_2xx_is_rejected_with_body() {
    let addr = spawn_server(Router::new().route(
        "/hook",
        post(|| async { (StatusCode::NOT_FOUND, "no_team") }),
    ))
    .await;

    let err = SlackNotifier::new(format!("http://{addr}/hook"))
        .notify(&item("abc", ts(9, 5)))
        .await
        .unwrap_err();

    match err {
        SinkError::Rejected { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body, "no_team");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_webhook_is_unavailable() {
    let addr = spawn_server(Router::new().route(
        "/hook",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "ok"
        }),
    ))
    .await;

    let err = SlackNotifier::new(format!("http://{addr}/hook"))
        .with_timeout(Duration::from_millis(200))
        .notify(&item("abc", ts(9, 5)))
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::Unavailable(_)), "{err:?}");
    assert!(!err.to_string().contains("/hook"), "{err}");
}

#[tokio::test]
async fn end_to_end_against_local_endpoints() {
    let page = r#"{"items":[
        {"id":{"videoId":"v1"},"snippet":{"publishedAt":"2025-09-06T09:40:00Z","title":"first","channelTitle":"A"}},
        {"id":{"videoId":"v2"},"snippet":{"publishedAt":"2025-09-06T09:30:00Z","title":"cursed","channelTitle":"B"}},
        {"id":{"videoId":"v3"},"snippet":{"publishedAt":"2025-09-06T09:20:00Z","title":"third","channelTitle":"C"}}
    ]}"#;
    let yt = spawn_server(Router::new().route("/search", get(move || async move { page }))).await;

    let inbox: Inbox = Arc::default();
    let slack = spawn_server(
        Router::new()
            .route("/hook", post(picky))
            .with_state(inbox.clone()),
    )
    .await;

    let poller = Poller::new(
        MemoryStateStore::new(),
        YouTubeSource::new("k".into()).with_api_base(format!("http://{yt}")),
        SlackNotifier::new(format!("http://{slack}/hook")),
        PollerSettings::default(),
    );
    let report = poller.run_once_at(ts(10, 0)).await.unwrap();

    assert_eq!(report.fetched, 3);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);
    assert!(report.failures[0].reason.contains("invalid_blocks"));

    let texts: Vec<String> = inbox
        .lock()
        .unwrap()
        .iter()
        .map(|b| b["text"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(texts, vec!["first by A", "third by C"]);

    assert!(poller.store().has_seen("v1").await.unwrap());
    assert!(!poller.store().has_seen("v2").await.unwrap());
    assert!(poller.store().has_seen("v3").await.unwrap());
    assert_eq!(poller.store().stored_watermark().await.unwrap(), Some(ts(10, 0)));
}
