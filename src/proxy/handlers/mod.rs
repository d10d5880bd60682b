//! Chat route handler and the streaming response writer
//!
//! The handler validates, opens the upstream stream and reads the first
//! upstream chunk before committing response headers. After that a spawned
//! `Relay` task owns the upstream body: it decodes SSE lines and pushes each
//! text delta into a bounded channel that backs the response body.

use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use super::error::ApiError;
use super::sse::{SseReassembler, StreamEvent};
use super::state::{generate_request_id, RelayState};
use super::upstream::UpstreamStream;
use super::validate::validate;
use crate::storage::{DailyLog, LogRecord};

/// Deltas buffered before the relay waits for the caller to drain
const RELAY_CHANNEL_CAPACITY: usize = 16;

type BodyChunk = Result<Bytes, std::io::Error>;

/// `POST <route_prefix>`
pub async fn chat_completion(
    State(state): State<RelayState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let request_id = generate_request_id();
    let span = tracing::info_span!("chat", id = %request_id);
    handle_chat(state, body, request_id).instrument(span).await
}

async fn handle_chat(
    state: RelayState,
    body: Result<Bytes, BytesRejection>,
    request_id: String,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            state
                .daily_log
                .append(&LogRecord::input(None).with_request_id(&request_id));
            let err = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ApiError::PayloadTooLarge
            } else {
                ApiError::UnreadableBody(rejection.body_text())
            };
            return reject(&state.daily_log, &request_id, err);
        }
    };
    tracing::info!("Chat request received ({} bytes)", body.len());

    let request: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            state
                .daily_log
                .append(&LogRecord::input(None).with_request_id(&request_id));
            return reject(&state.daily_log, &request_id, ApiError::InvalidJson(e.to_string()));
        }
    };

    let messages = request.get("messages").cloned().unwrap_or(Value::Null);
    state
        .daily_log
        .append(&LogRecord::input(Some(messages.clone())).with_request_id(&request_id));

    let chat = match validate(&request, state.fallback_key.as_deref()) {
        Ok(chat) => chat,
        Err(e) => return reject(&state.daily_log, &request_id, e),
    };

    let mut upstream = match state.upstream.open_stream(&chat).await {
        Ok(stream) => stream,
        Err(e) => return reject(&state.daily_log, &request_id, e.into()),
    };

    // Nothing has been sent yet, so a failing first read still gets a JSON 500
    let first = match upstream.next().await {
        Some(Ok(bytes)) => Some(bytes),
        Some(Err(e)) => {
            return reject(&state.daily_log, &request_id, ApiError::Stream(e.to_string()))
        }
        None => None,
    };

    let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
    let relay = Relay {
        tx,
        daily_log: state.daily_log.clone(),
        request_id,
        messages,
        text: String::new(),
    };
    tokio::spawn(relay.run(upstream, first).in_current_span());

    stream_response(rx)
}

/// Log the error and turn it into the JSON error response
fn reject(daily_log: &DailyLog, request_id: &str, err: ApiError) -> Response {
    let message = match &err {
        ApiError::Stream(detail) => detail.clone(),
        other => other.to_string(),
    };
    daily_log.append(&LogRecord::error(message, err.kind()).with_request_id(request_id));
    err.into_response()
}

fn stream_response(rx: mpsc::Receiver<BodyChunk>) -> Response {
    let body = Body::from_stream(ReceiverStream::new(rx));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}

// ============================================================================
// Relay task
// ============================================================================

enum Flow {
    Continue,
    Finished,
    CallerGone,
}

/// Pumps one upstream body into one caller response
struct Relay {
    tx: mpsc::Sender<BodyChunk>,
    daily_log: std::sync::Arc<DailyLog>,
    request_id: String,
    messages: Value,
    /// Everything relayed so far
    text: String,
}

impl Relay {
    async fn run(mut self, mut upstream: UpstreamStream, first: Option<Bytes>) {
        let mut sse = SseReassembler::new();
        let mut pending = first.map(Ok);

        loop {
            let item = match pending.take() {
                Some(item) => Some(item),
                None => upstream.next().await,
            };

            let events = match item {
                Some(Ok(bytes)) => sse.feed(&bytes),
                Some(Err(e)) => {
                    self.abort(format!("Upstream stream error: {e}")).await;
                    return;
                }
                None => {
                    let tail = sse.finish();
                    if let Flow::Continue = self.forward(tail).await {
                        self.abort("Upstream closed before [DONE]".to_string())
                            .await;
                    }
                    return;
                }
            };

            match self.forward(events).await {
                Flow::Continue => {}
                // Returning drops the upstream body and the sender, which
                // closes both connections
                Flow::Finished | Flow::CallerGone => return,
            }
        }
    }

    async fn forward(&mut self, events: Vec<StreamEvent>) -> Flow {
        for event in events {
            match event {
                StreamEvent::Delta(text) => {
                    let relayed = self.text.len();
                    self.text.push_str(&text);
                    if self.tx.send(Ok(Bytes::from(text))).await.is_err() {
                        self.text.truncate(relayed);
                        tracing::info!("Caller disconnected after {} bytes", relayed);
                        self.record(
                            LogRecord::error("Caller disconnected before [DONE]", "stream_error")
                                .with_partial_response(&self.text),
                        );
                        return Flow::CallerGone;
                    }
                }
                StreamEvent::Malformed { payload, reason } => {
                    tracing::warn!("Skipping malformed chunk ({} bytes): {}", payload.len(), reason);
                    self.record(LogRecord::error(
                        format!("Error processing chunk: {reason}"),
                        "decode_error",
                    ));
                }
                StreamEvent::Done => {
                    tracing::info!("Stream complete ({} bytes relayed)", self.text.len());
                    let messages = std::mem::take(&mut self.messages);
                    let text = std::mem::take(&mut self.text);
                    self.record(LogRecord::output(messages, text));
                    return Flow::Finished;
                }
            }
        }
        Flow::Continue
    }

    /// Headers are already out: log, then end the body with an error so the
    /// caller's client sees a truncated response rather than a clean end.
    async fn abort(&self, reason: String) {
        tracing::error!("{} ({} bytes relayed)", reason, self.text.len());
        self.record(LogRecord::error(reason.clone(), "stream_error").with_partial_response(&self.text));
        let _ = self
            .tx
            .send(Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, reason)))
            .await;
    }

    fn record(&self, record: LogRecord) {
        self.daily_log
            .append(&record.with_request_id(&self.request_id));
    }
}

#[cfg(test)]
mod tests;
