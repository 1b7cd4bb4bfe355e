//! Streamed chat answers.
//!
//! Pipeline for one assistant turn:
//!
//! ```text
//! HTTP body ──> EventStreamParser ──> ChatTurn ──decode──> ContentBlocks ──> TurnReveal
//!   bytes          StreamEvents        raw text              typed blocks      displayed text
//! ```
//!
//! The decoder always re-reads the whole accumulated text of the turn; block
//! ids are positional so each block's reveal continues across re-decodes.

pub mod block;
pub mod client;
pub mod config;
pub mod decoder;
pub mod event;
pub mod reveal;
pub mod turn;
pub mod turn_reveal;

pub use block::{BlockKind, ContentBlock, RenderHint};
pub use client::{events_from_body, ChatRequest, ChatStreamClient, EventStream};
pub use config::ChatStreamConfig;
pub use decoder::{classify_marker, decode, decode_streaming, try_decode, MARKERS};
pub use event::{EventStreamParser, StreamEvent};
pub use reveal::{RevealConfig, RevealScheduler};
pub use turn::{ChatTurn, TurnStatus};
pub use turn_reveal::{RevealedBlock, TurnReveal};

use thiserror::Error;

/// Errors raised by the chat pipeline.
///
/// Decoding never reports these to callers of [`decode`]; they only come out
/// of [`try_decode`], client construction and request setup.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Request could not be sent or was answered with an error status
    #[error("HTTP error: {0}")]
    Http(#[from] utils::UtilsError),

    /// Response body failed mid-stream
    #[error("Stream error: {0}")]
    Body(#[from] reqwest::Error),

    /// Marker tokenizer hit an impossible offset
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for chat stream operations
pub type Result<T> = std::result::Result<T, StreamError>;
