//! HTTP client for the streaming chat endpoint
//!
//! `ask` POSTs the question and hands back the response body as a stream of
//! [`StreamEvent`]s. Failures after the request was accepted show up inside
//! the stream as an `Error` event so the caller's turn fails with whatever
//! content already arrived.

use crate::config::ChatStreamConfig;
use crate::event::{EventStreamParser, StreamEvent};
use crate::Result;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use tracing::{debug, warn};
use utils::client::ensure_success;
use utils::{ClientConfig, HttpClient};

/// Stream of parsed chat events
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Body of a chat request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user's question
    pub question: String,

    /// Conversation to continue, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    /// Ask `question` in a new conversation.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            conversation_id: None,
        }
    }

    /// Continue the conversation with id `conversation_id`.
    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

/// Client for the streaming chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatStreamClient {
    client: HttpClient,
    url: String,
}

impl ChatStreamClient {
    /// Create a client from configuration.
    ///
    /// Questions are never re-sent automatically, so retries are disabled.
    pub fn new(config: &ChatStreamConfig) -> Result<Self> {
        let mut client_config = ClientConfig::new()
            .with_timeout(config.request_timeout())
            .with_max_retries(0)
            .with_header("Accept", "text/event-stream");
        if let Some(token) = &config.token {
            client_config = client_config.with_bearer_token(token);
        }

        Ok(Self::with_client(config.endpoint_url(), HttpClient::new(client_config)?))
    }

    /// Create a client over an existing HTTP client
    pub fn with_client(url: impl Into<String>, client: HttpClient) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send `request` and stream the answer.
    ///
    /// Errors only if the request cannot be sent or is rejected with a
    /// non-2xx status.
    pub async fn ask(&self, request: &ChatRequest) -> Result<EventStream> {
        debug!(url = %self.url, "sending chat request");
        let response = self.client.post_json(&self.url, request).await?;
        let response = ensure_success(response).await?;
        Ok(events_from_body(response.bytes_stream()))
    }
}

/// Parse a raw response body into chat events.
///
/// A body error ends the stream with an `Error` event.
pub fn events_from_body<S, B, E>(body: S) -> EventStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let events = async_stream::stream! {
        let mut parser = EventStreamParser::new();
        let mut body = Box::pin(body);
        let mut failed = false;

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in parser.push(bytes.as_ref()) {
                        yield event;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "chat response body failed");
                    yield StreamEvent::Error {
                        message: format!("response body failed: {}", e),
                    };
                    failed = true;
                    break;
                }
            }
        }

        if !failed {
            for event in parser.finish() {
                yield event;
            }
        }
    };

    Box::pin(events)
}
