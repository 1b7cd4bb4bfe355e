//! Subscription handles
//!
//! [`RealtimeClient::subscribe`] wires one connection manager, one fallback
//! poller and one update sink together for a task and hands back a
//! [`TaskSubscription`]. Every call creates a fresh channel; nothing is shared
//! between two subscriptions, even for the same task.

use crate::config::RealtimeConfig;
use crate::connection::ConnectionManager;
use crate::poller::{FallbackPoller, SnapshotSource};
use crate::progress::TaskProgressView;
use crate::sink::{UpdateSink, UpdateSource};
use crate::snapshot::HttpSnapshotSource;
use crate::transport::{PushTransport, WebSocketTransport};
use crate::types::{ConnectionState, TaskSnapshot};
use crate::{RealtimeError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use utils::clock::{SharedClock, TokioClock};
use utils::config::ValidateConfig;
use uuid::Uuid;

/// Opaque identity of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entry point for task progress subscriptions.
pub struct RealtimeClient {
    transport: Arc<dyn PushTransport>,
    source: Arc<dyn SnapshotSource>,
    config: RealtimeConfig,
    clock: SharedClock,
}

impl fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("config", &self.config)
            .finish()
    }
}

impl RealtimeClient {
    /// Create a client over explicit transport and snapshot source
    pub fn new(
        transport: Arc<dyn PushTransport>,
        source: Arc<dyn SnapshotSource>,
        config: RealtimeConfig,
    ) -> Self {
        Self {
            transport,
            source,
            config,
            clock: TokioClock::shared(),
        }
    }

    /// Replace the clock used for staleness checks
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Create a client using WebSocket push and the REST snapshot API.
    pub fn from_config(config: RealtimeConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RealtimeError::Config(e.to_string()))?;

        let source = HttpSnapshotSource::new(&config.api_base_url, config.token.as_deref())?;
        Ok(Self::new(
            Arc::new(WebSocketTransport::new()),
            Arc::new(source),
            config,
        ))
    }

    /// Client configuration
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Start following `task_id`. Must be called inside a tokio runtime.
    ///
    /// Opens a push channel, starts the fallback poller and fetches an
    /// initial snapshot for first paint.
    pub fn subscribe(&self, task_id: &str) -> TaskSubscription {
        let id = SubscriptionId::new();
        info!(%id, task_id, "subscribing to task");

        let sink = UpdateSink::new(task_id, self.clock.clone());
        let connection = ConnectionManager::spawn(
            task_id,
            self.transport.clone(),
            self.config.connection_config(task_id),
            sink.clone(),
        );

        let poller = FallbackPoller::new(
            self.source.clone(),
            sink.clone(),
            connection.watch_state(),
            self.clock.clone(),
        );
        poller.start_with(task_id, &self.config.poller);

        let initial_fetch = tokio::spawn(initial_fetch(
            self.source.clone(),
            sink.clone(),
            task_id.to_string(),
        ));

        TaskSubscription {
            id,
            task_id: task_id.to_string(),
            sink,
            connection,
            poller,
            initial_fetch: Mutex::new(Some(initial_fetch)),
            disposed: AtomicBool::new(false),
        }
    }
}

async fn initial_fetch(source: Arc<dyn SnapshotSource>, sink: UpdateSink, task_id: String) {
    match source.fetch(&task_id).await {
        Ok(snapshot) => {
            sink.deliver(snapshot, UpdateSource::InitialFetch);
        }
        Err(e) => warn!(task_id = %task_id, error = %e, "initial snapshot fetch failed"),
    }
}

/// Live subscription to one task.
///
/// Dropping the handle disposes it.
pub struct TaskSubscription {
    id: SubscriptionId,
    task_id: String,
    sink: UpdateSink,
    connection: ConnectionManager,
    poller: FallbackPoller,
    initial_fetch: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl fmt::Debug for TaskSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSubscription")
            .field("id", &self.id)
            .field("task_id", &self.task_id)
            .field("state", &self.state())
            .finish()
    }
}

impl TaskSubscription {
    /// Handle identity
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Subscribed task
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Current push-channel state
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watch push-channel state
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Register a raw snapshot callback
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(&TaskSnapshot) + Send + Sync + 'static,
    {
        self.sink.on_update(callback);
    }

    /// Register a progress view callback
    pub fn on_progress<F>(&self, callback: F)
    where
        F: Fn(&TaskProgressView) + Send + Sync + 'static,
    {
        self.sink.on_progress(callback);
    }

    /// Register a connection state callback
    pub fn on_connection_state_change<F>(&self, callback: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.connection.on_connection_state_change(callback);
    }

    /// Watch the progress view
    pub fn progress(&self) -> watch::Receiver<TaskProgressView> {
        self.sink.progress()
    }

    /// Latest progress view
    pub fn current_view(&self) -> TaskProgressView {
        self.sink.current_view()
    }

    /// Manual retry, typically after the connection reached `Failed`
    pub fn reconnect(&self) {
        self.connection.reconnect();
    }

    /// Stop everything. Idempotent; no callback fires after this returns.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(id = %self.id, task_id = %self.task_id, "disposing subscription");

        self.sink.close();
        self.poller.stop();
        self.connection.dispose();
        if let Some(handle) = self.initial_fetch.lock().take() {
            handle.abort();
        }
    }

    /// Whether the subscription has been disposed
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for TaskSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_ids_are_unique() {
        let a = SubscriptionId::new();
        let b = SubscriptionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }

    #[test]
    fn test_from_config_rejects_invalid_config() {
        let config = RealtimeConfig {
            api_base_url: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            RealtimeClient::from_config(config),
            Err(RealtimeError::Config(_))
        ));
    }
}
