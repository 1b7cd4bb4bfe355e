//! WebSocket push transport built on tokio-tungstenite.

use super::{ChannelEvent, ChannelRequest, PushChannel, PushTransport};
use crate::{RealtimeError, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Header carrying the bearer credential during the upgrade handshake
const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// Opens a fresh WebSocket per call
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a transport
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn open(&self, request: &ChannelRequest) -> Result<Box<dyn PushChannel>> {
        let mut upgrade = request.url.as_str().into_client_request()?;

        if let Some(token) = &request.token {
            let value = HeaderValue::from_str(token).map_err(|e| {
                RealtimeError::Transport(format!("credential is not a valid header value: {}", e))
            })?;
            upgrade.headers_mut().insert(SUBPROTOCOL_HEADER, value);
        }

        debug!(url = %request.url, "opening push channel");
        let (stream, response) = connect_async(upgrade).await?;
        info!(url = %request.url, status = response.status().as_u16(), "push channel open");

        Ok(Box::new(WebSocketChannel { stream }))
    }
}

/// An open WebSocket
pub struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushChannel for WebSocketChannel {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(ChannelEvent::Message(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(ChannelEvent::Message(text)),
                    Err(e) => {
                        warn!(error = %e, "dropping non-UTF-8 binary frame");
                    }
                },
                // tungstenite answers pings itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return Some(ChannelEvent::Closed { code, reason });
                }
                Err(e) => return Some(ChannelEvent::Error(e.to_string())),
            }
        }
    }

    async fn close(&mut self, code: u16) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Borrowed(""),
        };
        self.stream.close(Some(frame)).await?;
        Ok(())
    }
}
