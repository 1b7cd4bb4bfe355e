//! Accumulated state of one assistant turn.

use crate::block::ContentBlock;
use crate::decoder::{decode, decode_streaming};
use crate::event::StreamEvent;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Lifecycle of a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnStatus {
    /// Chunks are still arriving
    Streaming,
    /// The stream ended with `complete`
    Completed,
    /// The stream reported an error or ended early; content is kept
    Failed {
        /// What went wrong
        message: String,
    },
}

impl TurnStatus {
    /// Whether the turn will not change any more
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnStatus::Streaming)
    }
}

/// One assistant turn: raw text, status and decoded blocks.
///
/// Every chunk re-decodes the whole accumulated text. Block ids are
/// `{id}-{index}`, so a block keeps its id while its text grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Turn identifier, also the block id prefix
    pub id: String,
    /// Everything received so far
    pub raw_text: String,
    /// Lifecycle status
    pub status: TurnStatus,
    /// Blocks decoded from `raw_text`
    pub blocks: Vec<ContentBlock>,
}

impl ChatTurn {
    /// Start an empty streaming turn
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            raw_text: String::new(),
            status: TurnStatus::Streaming,
            blocks: Vec::new(),
        }
    }

    /// Build a finished turn from a complete, non-streamed answer
    pub fn from_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut turn = Self::new(id);
        turn.raw_text = text.into();
        turn.status = TurnStatus::Completed;
        turn.blocks = decode(&turn.raw_text, &turn.id);
        turn
    }

    /// Apply one stream event. Returns whether the turn changed.
    ///
    /// Events after the turn is terminal are ignored.
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        if self.status.is_terminal() {
            debug!(turn = %self.id, ?event, "ignoring event for finished turn");
            return false;
        }

        match event {
            StreamEvent::Chunk { content } => {
                if content.is_empty() {
                    return false;
                }
                self.raw_text.push_str(&content);
                self.blocks = decode_streaming(&self.raw_text, &self.id);
            }
            StreamEvent::Complete => {
                self.status = TurnStatus::Completed;
                self.blocks = decode(&self.raw_text, &self.id);
            }
            StreamEvent::Error { message } => {
                warn!(turn = %self.id, error = %message, "chat stream reported an error");
                self.status = TurnStatus::Failed { message };
                self.blocks = decode(&self.raw_text, &self.id);
            }
        }
        true
    }

    /// The transport ended. A turn that never saw `complete` fails.
    pub fn end_of_stream(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        warn!(turn = %self.id, len = self.raw_text.len(), "chat stream ended before completion");
        self.status = TurnStatus::Failed {
            message: "stream ended before completion".to_string(),
        };
        self.blocks = decode(&self.raw_text, &self.id);
    }

    /// Error message of a failed turn
    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            TurnStatus::Failed { message } => Some(message),
            _ => None,
        }
    }

    /// Whether the turn is finished
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
