//! Push-channel connection manager
//!
//! [`ConnectionManager`] owns one channel for one task. All lifecycle
//! decisions are made by the pure [`machine::ConnectionMachine`]; the driver
//! task spawned here only performs the resulting effects (open, handshake,
//! arm timers, close) and turns channel activity back into machine events.

pub mod machine;
pub mod message;

use crate::backoff::BackoffConfig;
use crate::sink::{UpdateSink, UpdateSource};
use crate::transport::{ChannelEvent, ChannelRequest, PushChannel, PushTransport};
use crate::types::{ConnectionState, TaskSnapshot};
use machine::{ConnectionEvent, ConnectionMachine, Effect};
use message::{decode_push_message, handshake_payload, PushMessage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default bound on a single open attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Push endpoint for this task
    pub url: String,

    /// Bearer credential
    pub token: Option<String>,

    /// Reconnect backoff
    pub backoff: BackoffConfig,

    /// Open attempts that neither succeed nor fail within this window count
    /// as failures
    pub connect_timeout: Duration,
}

impl ConnectionConfig {
    /// Create a config with default backoff and timeout
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            backoff: BackoffConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the bearer credential
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the backoff configuration
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the open timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Callback receiving connection state changes
pub type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Debug)]
enum Command {
    Reconnect,
    Dispose,
}

struct ManagerShared {
    task_id: String,
    disposed: AtomicBool,
    dispose_signal: Notify,
    state_tx: watch::Sender<ConnectionState>,
    state_listeners: Mutex<Vec<StateCallback>>,
}

impl ManagerShared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Publish a state change; after disposal only `Disconnected` gets through.
    fn publish(&self, state: ConnectionState) {
        if self.is_disposed() && state != ConnectionState::Disconnected {
            return;
        }

        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if !changed {
            return;
        }

        info!(task_id = %self.task_id, %state, "connection state changed");
        let listeners = self.state_listeners.lock().clone();
        for listener in &listeners {
            listener(state);
        }
    }
}

/// Lifecycle owner of one push channel.
///
/// Dropping the manager disposes it.
pub struct ConnectionManager {
    shared: Arc<ManagerShared>,
    commands: mpsc::UnboundedSender<Command>,
    sink: UpdateSink,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("task_id", &self.shared.task_id)
            .field("state", &self.state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl ConnectionManager {
    /// Start connecting for `task_id`. Must be called inside a tokio runtime.
    ///
    /// Accepted updates go to `sink`.
    pub fn spawn(
        task_id: impl Into<String>,
        transport: Arc<dyn PushTransport>,
        config: ConnectionConfig,
        sink: UpdateSink,
    ) -> Self {
        let task_id = task_id.into();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(ManagerShared {
            task_id: task_id.clone(),
            disposed: AtomicBool::new(false),
            dispose_signal: Notify::new(),
            state_tx,
            state_listeners: Mutex::new(Vec::new()),
        });

        let driver = Driver {
            task_id,
            transport,
            machine: ConnectionMachine::new(config.backoff),
            config,
            channel: None,
            retry_at: None,
            commands: commands_rx,
            shared: shared.clone(),
            sink: sink.clone(),
        };
        let handle = tokio::spawn(driver.run());

        Self {
            shared,
            commands: commands_tx,
            sink,
            driver: Mutex::new(Some(handle)),
        }
    }

    /// Task this connection is subscribed to
    pub fn task_id(&self) -> &str {
        &self.shared.task_id
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Watch connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Register a state change callback
    pub fn on_connection_state_change<F>(&self, callback: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.shared.state_listeners.lock().push(Arc::new(callback));
    }

    /// Register a snapshot callback on the shared sink
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(&TaskSnapshot) + Send + Sync + 'static,
    {
        self.sink.on_update(callback);
    }

    /// Close the channel, clear the backoff counter and connect again now.
    ///
    /// Works from any state, including `Failed`. Ignored after disposal.
    pub fn reconnect(&self) {
        if self.is_disposed() {
            warn!(task_id = %self.shared.task_id, "reconnect after dispose ignored");
            return;
        }
        if self.commands.send(Command::Reconnect).is_err() {
            warn!(task_id = %self.shared.task_id, "connection driver has exited");
        }
    }

    /// Shut down for good. Idempotent.
    ///
    /// State becomes `Disconnected` and no update is delivered from this
    /// connection once this returns; the driver closes the channel with a
    /// normal close code in the background.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(task_id = %self.shared.task_id, "disposing connection");

        self.shared.publish(ConnectionState::Disconnected);
        self.shared.dispose_signal.notify_one();
        if self.commands.send(Command::Dispose).is_err() {
            // driver already gone; nothing left to close
            if let Some(handle) = self.driver.lock().take() {
                handle.abort();
            }
        }
    }

    /// Whether [`ConnectionManager::dispose`] has been called
    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct Driver {
    task_id: String,
    transport: Arc<dyn PushTransport>,
    config: ConnectionConfig,
    machine: ConnectionMachine,
    channel: Option<Box<dyn PushChannel>>,
    retry_at: Option<Instant>,
    commands: mpsc::UnboundedReceiver<Command>,
    shared: Arc<ManagerShared>,
    sink: UpdateSink,
}

impl Driver {
    async fn run(mut self) {
        self.apply(ConnectionEvent::Connect).await;

        while !self.machine.is_disposed() {
            if self.shared.is_disposed() {
                self.apply(ConnectionEvent::Dispose).await;
                break;
            }

            let retry_at = self.retry_at;
            let event = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Reconnect) => ConnectionEvent::Reconnect,
                    Some(Command::Dispose) | None => ConnectionEvent::Dispose,
                },
                channel_event = next_channel_event(&mut self.channel) => {
                    match channel_event {
                        ChannelEvent::Message(text) => {
                            self.handle_message(&text);
                            continue;
                        }
                        ChannelEvent::Closed { code, reason } => {
                            debug!(task_id = %self.task_id, ?code, %reason, "channel closed by peer");
                            ConnectionEvent::Closed { code }
                        }
                        ChannelEvent::Error(error) => ConnectionEvent::Failed(error),
                    }
                }
                _ = sleep_until(retry_at) => {
                    self.retry_at = None;
                    ConnectionEvent::RetryTimerFired
                }
            };

            self.apply(event).await;
        }

        debug!(task_id = %self.task_id, "connection driver stopped");
    }

    /// Feed one event to the machine and carry out the effects, including
    /// those of follow-up events raised while doing so.
    async fn apply(&mut self, event: ConnectionEvent) {
        let mut effects: VecDeque<Effect> = self.machine.handle(event).into();
        self.shared.publish(self.machine.state());

        while let Some(effect) = effects.pop_front() {
            let follow_up = match effect {
                Effect::OpenChannel => Some(self.open_channel().await),
                Effect::SendHandshake => self.send_handshake().await.err(),
                Effect::ScheduleRetry(delay) => {
                    info!(
                        task_id = %self.task_id,
                        attempt = self.machine.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "scheduling reconnect"
                    );
                    self.retry_at = Some(Instant::now() + delay);
                    None
                }
                Effect::CancelRetry => {
                    self.retry_at = None;
                    None
                }
                Effect::CloseChannel(code) => {
                    if let Some(mut channel) = self.channel.take() {
                        if let Err(e) = channel.close(code).await {
                            debug!(task_id = %self.task_id, error = %e, "close failed");
                        }
                    }
                    None
                }
                Effect::DiscardChannel => {
                    self.channel = None;
                    None
                }
            };

            if let Some(event) = follow_up {
                effects.extend(self.machine.handle(event));
                self.shared.publish(self.machine.state());
            }
        }
    }

    /// Open a channel, bounded by the connect timeout and cut short by dispose.
    async fn open_channel(&mut self) -> ConnectionEvent {
        if self.shared.is_disposed() {
            return ConnectionEvent::Dispose;
        }

        let request = ChannelRequest {
            url: self.config.url.clone(),
            token: self.config.token.clone(),
        };
        debug!(task_id = %self.task_id, url = %request.url, "opening channel");

        let open = tokio::time::timeout(self.config.connect_timeout, self.transport.open(&request));
        let outcome = tokio::select! {
            outcome = open => outcome,
            _ = self.shared.dispose_signal.notified() => return ConnectionEvent::Dispose,
        };

        match outcome {
            Ok(Ok(channel)) => {
                self.channel = Some(channel);
                ConnectionEvent::Opened
            }
            Ok(Err(e)) => ConnectionEvent::Failed(e.to_string()),
            Err(_) => ConnectionEvent::Failed(format!(
                "connect timed out after {}ms",
                self.config.connect_timeout.as_millis()
            )),
        }
    }

    /// Returns the failure event if the handshake could not be sent.
    async fn send_handshake(&mut self) -> Result<(), ConnectionEvent> {
        let Some(channel) = self.channel.as_mut() else {
            return Err(ConnectionEvent::Failed("no channel for handshake".to_string()));
        };

        let payload = handshake_payload(&self.task_id)
            .map_err(|e| ConnectionEvent::Failed(e.to_string()))?;
        channel
            .send_text(payload)
            .await
            .map_err(|e| ConnectionEvent::Failed(format!("handshake failed: {}", e)))?;

        debug!(task_id = %self.task_id, "subscription handshake sent");
        Ok(())
    }

    fn handle_message(&self, text: &str) {
        if self.shared.is_disposed() {
            return;
        }

        match decode_push_message(text, &self.task_id) {
            PushMessage::Update(snapshot) => {
                self.sink.deliver(snapshot, UpdateSource::Push);
            }
            PushMessage::Unrecognized { event } => {
                debug!(task_id = %self.task_id, %event, "ignoring unrecognized event");
            }
            PushMessage::Rejected(reason) => {
                warn!(task_id = %self.task_id, %reason, "dropping push message");
            }
        }
    }
}

async fn next_channel_event(channel: &mut Option<Box<dyn PushChannel>>) -> ChannelEvent {
    match channel {
        Some(channel) => channel.next_event().await.unwrap_or(ChannelEvent::Closed {
            code: None,
            reason: "stream ended".to_string(),
        }),
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
