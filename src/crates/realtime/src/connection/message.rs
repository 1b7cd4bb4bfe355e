//! Push channel payloads
//!
//! Outbound: a single `{"task_id": "..."}` handshake after the channel opens.
//! Inbound: `{"event": "task_update", "data": <TaskSnapshot>}`; any other
//! event tag is ignored so the server can add events without breaking clients.

use crate::types::TaskSnapshot;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event tag of a task update
pub const TASK_UPDATE_EVENT: &str = "task_update";

#[derive(Debug, Serialize)]
struct SubscribeHandshake<'a> {
    task_id: &'a str,
}

/// Serialise the subscription handshake for `task_id`.
pub fn handshake_payload(task_id: &str) -> Result<String> {
    Ok(serde_json::to_string(&SubscribeHandshake { task_id })?)
}

#[derive(Debug, Deserialize)]
struct PushEnvelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Why an inbound payload was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Not JSON, or not an object
    Malformed(String),
    /// No `event` tag
    MissingEvent,
    /// Recognised tag without a usable `data` payload
    InvalidData(String),
    /// Update for a different task than the one subscribed
    TaskMismatch {
        /// Subscribed task
        expected: String,
        /// Task named in the payload
        actual: String,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Malformed(e) => write!(f, "malformed payload: {}", e),
            Rejection::MissingEvent => write!(f, "payload has no event tag"),
            Rejection::InvalidData(e) => write!(f, "invalid task_update data: {}", e),
            Rejection::TaskMismatch { expected, actual } => {
                write!(f, "update for task {} on subscription for {}", actual, expected)
            }
        }
    }
}

/// Classified inbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// A snapshot for the subscribed task
    Update(TaskSnapshot),
    /// Well-formed payload with an event tag this client does not handle
    Unrecognized {
        /// The unhandled tag
        event: String,
    },
    /// Payload that must be dropped
    Rejected(Rejection),
}

/// Validate and classify one inbound text frame.
pub fn decode_push_message(text: &str, expected_task_id: &str) -> PushMessage {
    let envelope: PushEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => return PushMessage::Rejected(Rejection::Malformed(e.to_string())),
    };

    let Some(event) = envelope.event else {
        return PushMessage::Rejected(Rejection::MissingEvent);
    };
    if event != TASK_UPDATE_EVENT {
        return PushMessage::Unrecognized { event };
    }

    let Some(data) = envelope.data else {
        return PushMessage::Rejected(Rejection::InvalidData("missing data".to_string()));
    };
    let snapshot: TaskSnapshot = match serde_json::from_value(data) {
        Ok(snapshot) => snapshot,
        Err(e) => return PushMessage::Rejected(Rejection::InvalidData(e.to_string())),
    };

    if snapshot.task_id != expected_task_id {
        return PushMessage::Rejected(Rejection::TaskMismatch {
            expected: expected_task_id.to_string(),
            actual: snapshot.task_id,
        });
    }

    PushMessage::Update(snapshot)
}
