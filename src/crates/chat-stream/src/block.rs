//! Typed content blocks produced by the decoder.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic kind of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Model's thinking
    Thinking,
    /// Analysis of the question or retrieved material
    Analyzing,
    /// Final answer
    Answer,
    /// Conversational reply
    Response,
    /// Cited documents
    DocumentRef,
    /// Unmarked text, passed through verbatim
    Raw,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockKind::Thinking => write!(f, "thinking"),
            BlockKind::Analyzing => write!(f, "analyzing"),
            BlockKind::Answer => write!(f, "answer"),
            BlockKind::Response => write!(f, "response"),
            BlockKind::DocumentRef => write!(f, "document_ref"),
            BlockKind::Raw => write!(f, "raw"),
        }
    }
}

/// How a block should be displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderHint {
    /// Reveal progressively rather than all at once
    pub typing_enabled: bool,
    /// Minimum characters revealed per tick
    pub reveal_rate_chars_per_tick: u32,
    /// Start collapsed
    pub collapsed_by_default: bool,
}

impl RenderHint {
    /// Default hint for a kind.
    ///
    /// | kind | typing | collapsed |
    /// |------|--------|-----------|
    /// | thinking, analyzing | yes | yes |
    /// | answer, response, raw | yes | no |
    /// | document_ref | no | no |
    pub fn for_kind(kind: BlockKind) -> Self {
        match kind {
            BlockKind::Thinking | BlockKind::Analyzing => Self {
                typing_enabled: true,
                reveal_rate_chars_per_tick: 1,
                collapsed_by_default: true,
            },
            BlockKind::Answer | BlockKind::Response | BlockKind::Raw => Self {
                typing_enabled: true,
                reveal_rate_chars_per_tick: 1,
                collapsed_by_default: false,
            },
            BlockKind::DocumentRef => Self {
                typing_enabled: false,
                reveal_rate_chars_per_tick: 1,
                collapsed_by_default: false,
            },
        }
    }
}

/// One decoded segment of a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Position-derived identifier, stable across re-decodes of a growing turn
    pub id: String,
    /// Semantic kind
    pub kind: BlockKind,
    /// Body text; grows while the turn streams
    pub raw_text: String,
    /// Display hint
    pub render_hint: RenderHint,
}

impl ContentBlock {
    /// Create a block with the default hint for `kind`
    pub fn new(id: impl Into<String>, kind: BlockKind, raw_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            raw_text: raw_text.into(),
            render_hint: RenderHint::for_kind(kind),
        }
    }

    /// Append streamed text
    pub fn extend_text(&mut self, more: &str) {
        self.raw_text.push_str(more);
    }

    /// Length in characters
    pub fn char_len(&self) -> usize {
        self.raw_text.chars().count()
    }
}
