use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::StatusCode, routing::post, Router};
use futures::stream;
use serde_json::{json, Value};

use crate::config::Config;
use crate::proxy::server::build_router;
use crate::proxy::state::RelayState;
use crate::proxy::upstream::UpstreamClient;
use crate::storage::{DailyLog, LogKind, LogRecord};

fn chunk(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({"choices": [{"delta": {"content": text}}]})
    )
}

/// Upstream that answers every POST with `parts`, a few ms apart
fn scripted_upstream(parts: Vec<String>) -> Router {
    let parts = Arc::new(parts);
    Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let parts = parts.clone();
            async move {
                let body = stream::unfold(0usize, move |i| {
                    let parts = parts.clone();
                    async move {
                        let part = parts.get(i)?.clone();
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Some((Ok::<_, Infallible>(part), i + 1))
                    }
                });
                Body::from_stream(body)
            }
        }),
    )
}

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

struct Harness {
    relay_url: String,
    log_dir: tempfile::TempDir,
    http: reqwest::Client,
}

impl Harness {
    async fn new(upstream: Router, fallback_key: Option<&str>) -> Self {
        let upstream_base = spawn(upstream).await;
        let log_dir = tempfile::tempdir().unwrap();

        let mut config = Config::default();
        config.upstream.url = format!("{upstream_base}/v1/chat/completions");
        config.upstream.timeout_secs = 5;
        config.log_dir = log_dir.path().to_path_buf();

        let state = RelayState::new(
            UpstreamClient::new(&config.upstream).unwrap(),
            Arc::new(DailyLog::new(log_dir.path()).unwrap()),
            fallback_key.map(str::to_string),
        );
        let relay_base = spawn(build_router(&config, state)).await;

        Self {
            relay_url: format!("{relay_base}{}", config.route_prefix),
            log_dir,
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, body: impl Into<reqwest::Body>) -> reqwest::Response {
        self.http
            .post(&self.relay_url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap()
    }

    fn records(&self) -> Vec<LogRecord> {
        read_records(self.log_dir.path())
    }
}

fn read_records(dir: &Path) -> Vec<LogRecord> {
    let mut records = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let content = std::fs::read_to_string(entry.unwrap().path()).unwrap();
        for line in content.lines() {
            records.push(serde_json::from_str(line).unwrap());
        }
    }
    records
}

fn hello_body() -> String {
    json!({
        "api_key": "sk-caller",
        "messages": [{"role": "user", "content": "hi"}]
    })
    .to_string()
}

async fn error_body(response: reqwest::Response) -> (StatusCode, Value) {
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_deltas_are_relayed_in_order_and_logged_once() {
    let upstream = scripted_upstream(vec![
        chunk("Hel"),
        chunk("lo"),
        "data: [DONE]\n\n".to_string(),
    ]);
    let harness = Harness::new(upstream, None).await;

    let response = harness.post(hello_body()).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream; charset=utf-8"
    );
    assert_eq!(response.text().await.unwrap(), "Hello");

    let records = harness.records();
    let kinds: Vec<LogKind> = records.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![LogKind::Input, LogKind::Output]);
    assert_eq!(
        records[0].messages,
        Some(json!([{"role": "user", "content": "hi"}]))
    );
    assert_eq!(records[1].response.as_deref(), Some("Hello"));
    assert_eq!(records[0].request_id, records[1].request_id);
}

#[tokio::test]
async fn test_line_split_across_upstream_reads() {
    let line = chunk("split");
    let (a, b) = line.split_at(12);
    let upstream = scripted_upstream(vec![
        a.to_string(),
        b.to_string(),
        "data: [DO".to_string(),
        "NE]\n\n".to_string(),
    ]);
    let harness = Harness::new(upstream, None).await;

    let response = harness.post(hello_body()).await;
    assert_eq!(response.text().await.unwrap(), "split");
}

#[tokio::test]
async fn test_malformed_chunk_is_skipped() {
    let upstream = scripted_upstream(vec![
        chunk("a"),
        "data: {broken\n\n".to_string(),
        chunk("b"),
        "data: [DONE]\n\n".to_string(),
    ]);
    let harness = Harness::new(upstream, None).await;

    let response = harness.post(hello_body()).await;
    assert_eq!(response.text().await.unwrap(), "ab");

    let records = harness.records();
    let output = records.iter().find(|r| r.kind == LogKind::Output).unwrap();
    assert_eq!(output.response.as_deref(), Some("ab"));
    assert!(records
        .iter()
        .any(|r| r.kind == LogKind::Error && r.error_type.as_deref() == Some("decode_error")));
}

#[tokio::test]
async fn test_missing_key_is_rejected_before_upstream() {
    let harness = Harness::new(scripted_upstream(Vec::new()), None).await;

    let body = json!({"messages": [{"role": "user", "content": "hi"}]}).to_string();
    let (status, body) = error_body(harness.post(body).await).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "missing_api_key");

    let records = harness.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].kind, LogKind::Input);
    assert_eq!(records[1].kind, LogKind::Error);
    assert_eq!(records[1].error_type.as_deref(), Some("invalid_request_error"));
}

#[tokio::test]
async fn test_fallback_key_is_used() {
    let upstream = scripted_upstream(vec![chunk("ok"), "data: [DONE]\n\n".to_string()]);
    let harness = Harness::new(upstream, Some("sk-process")).await;

    let body = json!({"messages": [{"role": "user", "content": "hi"}]}).to_string();
    let response = harness.post(body).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_invalid_messages_are_400() {
    let harness = Harness::new(scripted_upstream(Vec::new()), None).await;

    let not_array = json!({"api_key": "k", "messages": "hi"}).to_string();
    let (status, body) = error_body(harness.post(not_array).await).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_type");

    let no_role = json!({"api_key": "k", "messages": [{"content": "hi"}]}).to_string();
    let (status, body) = error_body(harness.post(no_role).await).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_message_format");
}

#[tokio::test]
async fn test_invalid_json_is_400() {
    let harness = Harness::new(scripted_upstream(Vec::new()), None).await;

    let (status, body) = error_body(harness.post("{not json").await).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_json");

    let records = harness.records();
    assert_eq!(records[0].kind, LogKind::Input);
    assert_eq!(records[0].messages, None);
}

#[tokio::test]
async fn test_upstream_status_is_500() {
    let upstream = Router::new().route(
        "/v1/chat/completions",
        post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
    );
    let harness = Harness::new(upstream, None).await;

    let (status, body) = error_body(harness.post(hello_body()).await).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["type"], "upstream_error");
    assert_eq!(body["error"]["code"], "upstream_status");

    let records = harness.records();
    assert_eq!(records.last().unwrap().error_type.as_deref(), Some("upstream_error"));
    assert!(!records.iter().any(|r| r.kind == LogKind::Output));
}

#[tokio::test]
async fn test_upstream_closing_early_aborts_the_body() {
    let upstream = scripted_upstream(vec![chunk("Hel"), chunk("lo")]);
    let harness = Harness::new(upstream, None).await;

    let response = harness.post(hello_body()).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.bytes().await.is_err());

    let records = harness.records();
    assert!(!records.iter().any(|r| r.kind == LogKind::Output));
    let error = records.iter().find(|r| r.kind == LogKind::Error).unwrap();
    assert_eq!(error.error_type.as_deref(), Some("stream_error"));
    assert_eq!(error.response.as_deref(), Some("Hello"));
}

#[tokio::test]
async fn test_health_reports_pid() {
    let harness = Harness::new(scripted_upstream(Vec::new()), None).await;
    let base = harness.relay_url.trim_end_matches("/api/dsv3");

    let body: Value = harness
        .http
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["pid"], std::process::id());
}

#[tokio::test]
async fn test_first_read_failure_is_json_500() {
    let upstream = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            // Headers go out, then the body fails before any data
            let body = stream::once(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err::<String, _>(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "upstream reset",
                ))
            });
            Body::from_stream(body)
        }),
    );
    let harness = Harness::new(upstream, None).await;

    let (status, body) = error_body(harness.post(hello_body()).await).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["type"], "stream_error");
    assert_eq!(body["error"]["code"], "stream_processing_failed");

    let records = harness.records();
    assert!(!records.iter().any(|r| r.kind == LogKind::Output));
    assert_eq!(records.last().unwrap().kind, LogKind::Error);
    assert_eq!(records.last().unwrap().error_type.as_deref(), Some("stream_error"));
}

#[tokio::test]
async fn test_caller_disconnect_stops_relay_and_logs_sent_text() {
    let mut parts = vec![chunk("a")];
    parts.extend(std::iter::repeat(chunk("b")).take(400));
    let harness = Harness::new(scripted_upstream(parts), None).await;

    let mut response = harness.post(hello_body()).await;
    let first = response.chunk().await.unwrap().unwrap();
    assert!(first.starts_with(b"a"));
    drop(response);

    let mut error = None;
    for _ in 0..100 {
        error = harness
            .records()
            .into_iter()
            .find(|r| r.kind == LogKind::Error);
        if error.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let error = error.expect("no ERROR record after disconnect");

    assert_eq!(error.error_type.as_deref(), Some("stream_error"));
    assert_eq!(error.error.as_deref(), Some("Caller disconnected before [DONE]"));
    let sent = error.response.unwrap();
    assert!(sent.starts_with('a'));
    assert!(sent[1..].chars().all(|c| c == 'b'), "sent: {sent}");
    // The upstream had 401 deltas to give; the relay stopped well before
    assert!(sent.len() < 401);
    assert!(!harness.records().iter().any(|r| r.kind == LogKind::Output));
}

#[tokio::test]
async fn test_oversized_body_is_413_and_logged() {
    let harness = Harness::new(scripted_upstream(Vec::new()), None).await;
    assert_eq!(Config::default().body_limit_bytes, 10 * 1024 * 1024);

    let oversized = vec![b' '; 11 * 1024 * 1024];
    let (status, body) = error_body(harness.post(oversized).await).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"]["code"], "payload_too_large");

    let records = harness.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].kind, LogKind::Input);
    assert_eq!(records[1].kind, LogKind::Error);
    assert_eq!(records[1].error_type.as_deref(), Some("invalid_request_error"));
}
