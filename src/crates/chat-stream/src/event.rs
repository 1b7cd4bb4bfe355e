//! Event-stream records
//!
//! The chat endpoint answers with `data: <json>` lines separated by blank
//! lines. [`EventStreamParser`] turns arbitrarily split body chunks into
//! [`StreamEvent`]s; anything it cannot use is logged and skipped.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Prefix of a record line
const DATA_PREFIX: &str = "data:";

/// One record of the chat event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Text to append to the current turn
    Chunk {
        /// Appended text
        content: String,
    },
    /// End of the turn
    Complete,
    /// The turn failed upstream
    Error {
        /// Error description
        message: String,
    },
}

impl StreamEvent {
    /// Shorthand for a chunk event
    pub fn chunk(content: impl Into<String>) -> Self {
        StreamEvent::Chunk {
            content: content.into(),
        }
    }

    /// Whether the event ends the turn
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk { .. })
    }
}

/// Loose view of a record so unknown `type` values can be skipped.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Incremental `data:` line parser.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    buffer: Vec<u8>,
}

impl EventStreamParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw body bytes and return the events completed by them.
    ///
    /// Bytes are buffered until a newline, so multi-byte characters split
    /// across chunks are reassembled before decoding.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = parse_line(&line[..line.len() - 1]) {
                events.push(event);
            }
        }
        events
    }

    /// Feed text
    pub fn push_str(&mut self, text: &str) -> Vec<StreamEvent> {
        self.push(text.as_bytes())
    }

    /// Parse whatever is left after the body ended without a final newline.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest).into_iter().collect()
    }

    /// Bytes waiting for a line break
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_line(line: &[u8]) -> Option<StreamEvent> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.is_empty() {
        return None;
    }

    let line = match std::str::from_utf8(line) {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "dropping non-UTF-8 event line");
            return None;
        }
    };
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    let record: RawRecord = match serde_json::from_str(payload) {
        Ok(record) => record,
        Err(e) => {
            warn!(error = %e, payload, "dropping malformed event record");
            return None;
        }
    };

    match record.kind.as_str() {
        "chunk" => Some(StreamEvent::Chunk {
            content: record.content.unwrap_or_default(),
        }),
        "complete" => Some(StreamEvent::Complete),
        "error" => Some(StreamEvent::Error {
            message: record
                .message
                .unwrap_or_else(|| "unknown upstream error".to_string()),
        }),
        other => {
            debug!(kind = other, "ignoring unknown event type");
            None
        }
    }
}
