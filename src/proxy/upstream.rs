//! Streaming client for the upstream chat-completion endpoint

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use std::time::Duration;

use super::error::UpstreamError;
use super::validate::{ChatMessage, ValidatedChat};
use crate::config::UpstreamConfig;

/// Raw upstream body, chunked however the network delivers it
pub type UpstreamStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// Longest upstream error body quoted back to the caller
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// One per worker; the inner reqwest client pools connections
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    url: String,
    model: String,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        // No overall request timeout: it would cut long generations short.
        // The header wait is bounded in open_stream instead.
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .pool_max_idle_per_host(10)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            url: config.url.clone(),
            model: config.model.clone(),
            timeout: config.timeout(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST the conversation with `stream: true` and hand back the body.
    ///
    /// One attempt, no retry.
    pub async fn open_stream(&self, chat: &ValidatedChat) -> Result<UpstreamStream, UpstreamError> {
        let payload = CompletionRequest {
            model: &self.model,
            messages: &chat.messages,
            stream: true,
        };

        let request = self
            .http
            .post(&self.url)
            .bearer_auth(&chat.credential)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&payload);

        let response = match tokio::time::timeout(self.timeout, request.send()).await {
            Err(_) => return Err(UpstreamError::Timeout(self.timeout)),
            Ok(Err(e)) if e.is_timeout() => return Err(UpstreamError::Timeout(self.timeout)),
            Ok(Err(e)) => return Err(UpstreamError::Unavailable(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::time::timeout(self.timeout, response.text())
                .await
                .ok()
                .and_then(|r| r.ok())
                .unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: truncate_utf8(body.trim(), MAX_ERROR_BODY).to_string(),
            });
        }

        tracing::debug!("Upstream stream opened ({})", status);
        Ok(response.bytes_stream().boxed())
    }
}

/// Cut at most `max_bytes` without splitting a character
fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
