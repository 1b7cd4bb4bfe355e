//! Push channel abstraction
//!
//! The connection driver talks to the network only through [`PushTransport`]
//! and [`PushChannel`], so it can be exercised against an in-memory fake.

pub mod websocket;

pub use websocket::WebSocketTransport;

use crate::Result;
use async_trait::async_trait;

/// Close code for an orderly, caller-initiated shutdown
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code sent when an endpoint is going away (page unload, server drain)
pub const GOING_AWAY: u16 = 1001;

/// Whether a close code means "do not reconnect".
///
/// A missing code (connection dropped without a close frame) is abnormal.
pub fn is_normal_close(code: Option<u16>) -> bool {
    matches!(code, Some(NORMAL_CLOSURE) | Some(GOING_AWAY))
}

/// Something that happened on an open channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A text frame
    Message(String),

    /// The peer closed the channel
    Closed {
        /// Close code, if the peer sent one
        code: Option<u16>,
        /// Close reason
        reason: String,
    },

    /// Protocol or I/O failure; the channel is unusable afterwards
    Error(String),
}

/// Parameters for opening one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Endpoint URL
    pub url: String,

    /// Bearer credential, negotiated as a subprotocol
    pub token: Option<String>,
}

/// Opens push channels.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open a new channel. Each call yields an independent channel.
    async fn open(&self, request: &ChannelRequest) -> Result<Box<dyn PushChannel>>;
}

/// One open push channel.
#[async_trait]
pub trait PushChannel: Send {
    /// Send a text frame
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Wait for the next event; `None` once the stream has ended without a
    /// close frame.
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    /// Close the channel with the given code
    async fn close(&mut self, code: u16) -> Result<()>;
}
