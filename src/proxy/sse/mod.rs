// SSE (Server-Sent Events) reassembly for chat-completion streams
//
// The upstream emits OpenAI-style chunks:
// ```
// data: {"choices":[{"delta":{"content":"Hel"}}]}
//
// data: [DONE]
// ```
//
// Network reads do not respect line boundaries, so the reassembler keeps the
// unterminated tail of the previous chunk and only decodes complete lines.
// The tail is kept as bytes: a multi-byte UTF-8 character split across two
// reads is decoded once both halves have arrived.

use serde::Deserialize;

/// Payload that marks the end of the stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// A decoded increment of the upstream stream, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental assistant text
    Delta(String),
    /// A `data:` payload that could not be decoded; skipped
    Malformed { payload: String, reason: String },
    /// Terminal sentinel seen; nothing after it is processed
    Done,
}

/// Line-buffering decoder fed with raw upstream chunks
#[derive(Debug, Default)]
pub struct SseReassembler {
    /// Bytes after the last newline seen so far
    partial: Vec<u8>,
    done: bool,
}

impl SseReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one chunk; returns the events completed by it.
    ///
    /// After `Done` every further call returns nothing.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        self.partial.extend_from_slice(chunk);

        let mut consumed = 0;
        while let Some(offset) = self.partial[consumed..].iter().position(|&b| b == b'\n') {
            let line_end = consumed + offset;
            let event = decode_line(&self.partial[consumed..line_end]);
            consumed = line_end + 1;

            if let Some(event) = event {
                let finished = event == StreamEvent::Done;
                events.push(event);
                if finished {
                    self.done = true;
                    break;
                }
            }
        }

        if self.done {
            self.partial.clear();
        } else {
            self.partial.drain(..consumed);
        }

        events
    }

    /// Flush a final line the upstream sent without a trailing newline
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.done || self.partial.is_empty() {
            self.partial.clear();
            return Vec::new();
        }

        let tail = std::mem::take(&mut self.partial);
        match decode_line(&tail) {
            Some(event) => {
                if event == StreamEvent::Done {
                    self.done = true;
                }
                vec![event]
            }
            None => Vec::new(),
        }
    }
}

// ============================================================================
// Line-Level Decoding
// ============================================================================

/// Extract the payload of a `data:` line (one leading space is optional)
pub fn parse_data_line(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Decode a chunk payload into its text increment.
///
/// `Ok(None)` for well-formed chunks that carry no text (role-only first
/// chunk, usage-only last chunk, empty choices).
pub fn decode_payload(payload: &str) -> Result<Option<String>, serde_json::Error> {
    let chunk: CompletionChunk = serde_json::from_str(payload)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|text| !text.is_empty()))
}

fn decode_line(raw: &[u8]) -> Option<StreamEvent> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    let payload = parse_data_line(&line)?.trim_end();

    if payload.is_empty() {
        return None;
    }
    if payload == DONE_SENTINEL {
        return Some(StreamEvent::Done);
    }

    match decode_payload(payload) {
        Ok(Some(text)) => Some(StreamEvent::Delta(text)),
        Ok(None) => None,
        Err(e) => Some(StreamEvent::Malformed {
            payload: payload.to_string(),
            reason: e.to_string(),
        }),
    }
}
