//! Relay error types and response handling
//!
//! Every failure the chat route can report before a stream starts is an
//! `ApiError`. Status code, `type`, `param` and `code` all come from one
//! exhaustive match per field, so a new variant cannot be half-mapped.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Failures opening the upstream stream (before any byte was relayed)
#[derive(Debug)]
pub enum UpstreamError {
    /// No response headers within the configured bound
    Timeout(Duration),
    /// DNS, connect, TLS or protocol failure
    Unavailable(String),
    /// Upstream answered with a non-2xx status
    Status { status: u16, body: String },
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Timeout(after) => {
                write!(f, "Upstream did not respond within {}s", after.as_secs())
            }
            UpstreamError::Unavailable(msg) => write!(f, "Upstream request failed: {msg}"),
            UpstreamError::Status { status, body } if body.is_empty() => {
                write!(f, "Upstream returned status {status}")
            }
            UpstreamError::Status { status, body } => {
                write!(f, "Upstream returned status {status}: {body}")
            }
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Errors the chat route answers with a JSON body
#[derive(Debug)]
pub enum ApiError {
    /// Body is larger than the configured limit
    PayloadTooLarge,
    /// Body could not be read off the connection
    UnreadableBody(String),
    /// Body is not JSON
    InvalidJson(String),
    /// Neither the caller nor the process supplied a credential
    MissingApiKey,
    /// `messages` is absent or not an array
    InvalidType,
    /// Element `index` of `messages` lacks a role or content
    InvalidMessageFormat { index: usize },
    Upstream(UpstreamError),
    /// Upstream body failed before the first byte reached the caller
    Stream(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingApiKey => StatusCode::UNAUTHORIZED,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnreadableBody(_)
            | ApiError::InvalidJson(_)
            | ApiError::InvalidType
            | ApiError::InvalidMessageFormat { .. } => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) | ApiError::Stream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `type` field of the error body
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::PayloadTooLarge
            | ApiError::UnreadableBody(_)
            | ApiError::InvalidJson(_)
            | ApiError::MissingApiKey
            | ApiError::InvalidType
            | ApiError::InvalidMessageFormat { .. } => "invalid_request_error",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::Stream(_) => "stream_error",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::PayloadTooLarge => "payload_too_large",
            ApiError::UnreadableBody(_) => "invalid_body",
            ApiError::InvalidJson(_) => "invalid_json",
            ApiError::MissingApiKey => "missing_api_key",
            ApiError::InvalidType => "invalid_type",
            ApiError::InvalidMessageFormat { .. } => "invalid_message_format",
            ApiError::Upstream(UpstreamError::Timeout(_)) => "upstream_timeout",
            ApiError::Upstream(UpstreamError::Unavailable(_)) => "upstream_unavailable",
            ApiError::Upstream(UpstreamError::Status { .. }) => "upstream_status",
            ApiError::Stream(_) => "stream_processing_failed",
        }
    }

    /// Offending request field, if any
    pub fn param(&self) -> Option<&'static str> {
        match self {
            ApiError::MissingApiKey => Some("api_key"),
            ApiError::InvalidType | ApiError::InvalidMessageFormat { .. } => Some("messages"),
            ApiError::PayloadTooLarge
            | ApiError::UnreadableBody(_)
            | ApiError::InvalidJson(_)
            | ApiError::Upstream(_)
            | ApiError::Stream(_) => None,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::PayloadTooLarge => write!(f, "Request body exceeds the size limit"),
            ApiError::UnreadableBody(msg) => write!(f, "Request body could not be read: {msg}"),
            ApiError::InvalidJson(msg) => write!(f, "Request body is not valid JSON: {msg}"),
            ApiError::MissingApiKey => write!(f, "API key is required"),
            ApiError::InvalidType => write!(
                f,
                "Invalid type for 'messages': expected an array of objects, but got something else."
            ),
            ApiError::InvalidMessageFormat { .. } => {
                write!(f, "Each message must have 'role' and 'content' fields")
            }
            ApiError::Upstream(e) => write!(f, "{e}"),
            ApiError::Stream(_) => write!(f, "Stream processing error"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<UpstreamError> for ApiError {
    fn from(e: UpstreamError) -> Self {
        ApiError::Upstream(e)
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
    param: Option<&'static str>,
    code: &'static str,
}

/// `{ error: { message, type, param, code }, timestamp }`
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    timestamp: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            ApiError::Stream(detail) => {
                tracing::error!("Relay error: {} - {} ({})", status, self, detail)
            }
            ApiError::Upstream(_) => tracing::error!("Relay error: {} - {}", status, self),
            _ => tracing::warn!("Rejected request: {} - {}", status, self),
        }

        let body = ErrorBody {
            error: ErrorDetail {
                message: self.to_string(),
                kind: self.kind(),
                param: self.param(),
                code: self.code(),
            },
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        };

        (status, Json(body)).into_response()
    }
}
