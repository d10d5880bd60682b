//! Request validation for the chat route
//!
//! Works on the untyped JSON body so that a `messages` field of the wrong
//! shape is reported as `invalid_type` instead of a generic decode error.

use serde::Serialize;
use serde_json::Value;

use super::error::ApiError;

/// One role/content pair, forwarded to the upstream as received.
///
/// `content` stays a JSON value so multi-part content arrays pass through.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
}

/// A request that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedChat {
    /// Caller key if given, else the configured fallback
    pub credential: String,
    pub messages: Vec<ChatMessage>,
}

/// Check credential availability, then the shape of `messages`.
///
/// The caller's non-empty `api_key` takes precedence over `fallback_key`.
pub fn validate(body: &Value, fallback_key: Option<&str>) -> Result<ValidatedChat, ApiError> {
    let credential = body
        .get("api_key")
        .and_then(caller_key)
        .or_else(|| {
            fallback_key
                .filter(|k| !k.trim().is_empty())
                .map(str::to_string)
        })
        .ok_or(ApiError::MissingApiKey)?;

    let raw_messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or(ApiError::InvalidType)?;

    let messages = raw_messages
        .iter()
        .enumerate()
        .map(|(index, msg)| parse_message(msg).ok_or(ApiError::InvalidMessageFormat { index }))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ValidatedChat {
        credential,
        messages,
    })
}

/// A usable caller key: non-blank text, or a non-zero number taken as text
fn caller_key(value: &Value) -> Option<String> {
    match value {
        Value::String(key) if !key.trim().is_empty() => Some(key.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_message(msg: &Value) -> Option<ChatMessage> {
    let role = msg.get("role")?.as_str().filter(|r| !r.is_empty())?;
    let content = msg.get("content").filter(|c| has_content(c))?;

    Some(ChatMessage {
        role: role.to_string(),
        content: content.clone(),
    })
}

/// Non-empty text, or a non-empty array of content parts
fn has_content(value: &Value) -> bool {
    match value {
        Value::String(s) => !s.is_empty(),
        Value::Array(parts) => !parts.is_empty(),
        _ => false,
    }
}
