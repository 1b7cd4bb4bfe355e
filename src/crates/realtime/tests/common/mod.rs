//! In-memory push transport and snapshot source for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use realtime::{
    ChannelEvent, ChannelRequest, PushChannel, PushTransport, RealtimeError, Result,
    SnapshotSource, TaskSnapshot,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// What the next `open` call does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Fail immediately
    Fail,
    /// Never complete
    Hang,
    /// Hand out a connected channel
    Accept,
}

/// Frame sent by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Close(u16),
}

pub struct FakeTransport {
    script: Mutex<VecDeque<OpenOutcome>>,
    default: Mutex<OpenOutcome>,
    opens: Mutex<Vec<Instant>>,
    requests: Mutex<Vec<ChannelRequest>>,
    servers: mpsc::UnboundedSender<FakeServer>,
}

impl FakeTransport {
    pub fn new(default: OpenOutcome) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeServer>) {
        let (servers, servers_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            default: Mutex::new(default),
            opens: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            servers,
        });
        (transport, servers_rx)
    }

    /// Queue an outcome ahead of the default
    pub fn push_outcome(&self, outcome: OpenOutcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn set_default(&self, outcome: OpenOutcome) {
        *self.default.lock() = outcome;
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().len()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().clone()
    }

    /// Gaps between consecutive opens, in whole milliseconds
    pub fn open_gaps_ms(&self) -> Vec<u64> {
        self.open_times()
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
            .collect()
    }

    pub fn requests(&self) -> Vec<ChannelRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn open(&self, request: &ChannelRequest) -> Result<Box<dyn PushChannel>> {
        self.opens.lock().push(Instant::now());
        self.requests.lock().push(request.clone());

        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.lock().clone());

        match outcome {
            OpenOutcome::Fail => Err(RealtimeError::Transport("connection refused".to_string())),
            OpenOutcome::Hang => std::future::pending().await,
            OpenOutcome::Accept => {
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                let (sent_tx, sent_rx) = mpsc::unbounded_channel();
                let _ = self.servers.send(FakeServer {
                    events: events_tx,
                    sent: sent_rx,
                });
                Ok(Box::new(FakeChannel {
                    events: events_rx,
                    sent: sent_tx,
                }))
            }
        }
    }
}

struct FakeChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    sent: mpsc::UnboundedSender<Sent>,
}

#[async_trait]
impl PushChannel for FakeChannel {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sent
            .send(Sent::Text(text))
            .map_err(|_| RealtimeError::ChannelClosed)
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    async fn close(&mut self, code: u16) -> Result<()> {
        self.sent
            .send(Sent::Close(code))
            .map_err(|_| RealtimeError::ChannelClosed)
    }
}

/// Server end of one accepted channel. Dropping it ends the stream.
pub struct FakeServer {
    events: mpsc::UnboundedSender<ChannelEvent>,
    sent: mpsc::UnboundedReceiver<Sent>,
}

impl FakeServer {
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.events.send(ChannelEvent::Message(text.into()));
    }

    pub fn send_update(&self, snapshot: &TaskSnapshot) {
        let payload = json!({"event": "task_update", "data": snapshot});
        self.send_text(payload.to_string());
    }

    pub fn close(&self, code: Option<u16>) {
        let _ = self.events.send(ChannelEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    pub fn fail(&self, error: &str) {
        let _ = self.events.send(ChannelEvent::Error(error.to_string()));
    }

    pub async fn next_sent(&mut self) -> Option<Sent> {
        tokio::time::timeout(Duration::from_secs(60), self.sent.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Snapshot source returning scripted results, then a fallback snapshot.
pub struct FakeSnapshotSource {
    script: Mutex<VecDeque<Result<TaskSnapshot>>>,
    fallback: Mutex<Option<TaskSnapshot>>,
    calls: Mutex<Vec<Instant>>,
}

impl FakeSnapshotSource {
    pub fn new(fallback: Option<TaskSnapshot>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, result: Result<TaskSnapshot>) {
        self.script.lock().push_back(result);
    }

    pub fn set_fallback(&self, snapshot: TaskSnapshot) {
        *self.fallback.lock() = Some(snapshot);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SnapshotSource for FakeSnapshotSource {
    async fn fetch(&self, _task_id: &str) -> Result<TaskSnapshot> {
        self.calls.lock().push(Instant::now());
        if let Some(result) = self.script.lock().pop_front() {
            return result;
        }
        self.fallback
            .lock()
            .clone()
            .ok_or_else(|| RealtimeError::Transport("no snapshot".to_string()))
    }
}

/// Wait (in virtual time) until `rx` reports `wanted`.
pub async fn wait_for<T>(rx: &mut watch::Receiver<T>, wanted: impl Fn(&T) -> bool)
where
    T: Clone,
{
    tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|value| wanted(value)))
        .await
        .expect("timed out waiting for watched value")
        .expect("watch sender dropped");
}
