//! Real-time task progress synchronisation.
//!
//! Keeps a task/progress view consistent with server state delivered over two
//! unreliable paths: a push channel (WebSocket) owned by a
//! [`ConnectionManager`], and a [`FallbackPoller`] that fetches full snapshots
//! whenever the push path is unhealthy or stale. Both paths feed one
//! [`UpdateSink`], which runs the [`progress::aggregate`] step and publishes a
//! [`TaskProgressView`] for rendering.
//!
//! Most callers only need [`RealtimeClient`]:
//!
//! ```rust,ignore
//! use realtime::{RealtimeClient, RealtimeConfig};
//!
//! let client = RealtimeClient::from_config(RealtimeConfig::from_env("KBSYNC")?)?;
//! let subscription = client.subscribe("task-42");
//! subscription.on_progress(|view| println!("{}% {:?}", view.overall_progress, view.current_step_name));
//! ```

pub mod backoff;
pub mod config;
pub mod connection;
pub mod poller;
pub mod progress;
pub mod sink;
pub mod snapshot;
pub mod subscription;
pub mod transport;
pub mod types;

pub use backoff::{BackoffConfig, BackoffScheduler, BackoffStep};
pub use config::RealtimeConfig;
pub use connection::{ConnectionConfig, ConnectionManager};
pub use poller::{FallbackPoller, PollerConfig, SnapshotSource};
pub use progress::{aggregate, StepAggregate, TaskProgressView};
pub use sink::{UpdateSink, UpdateSource};
pub use snapshot::HttpSnapshotSource;
pub use subscription::{RealtimeClient, SubscriptionId, TaskSubscription};
pub use transport::{ChannelEvent, ChannelRequest, PushChannel, PushTransport};
pub use types::{ConnectionState, StepRecord, StepStatus, TaskSnapshot, TaskStatus};
pub use utils::clock::{Clock, ManualClock, SharedClock, TokioClock};

use thiserror::Error;

/// Errors raised by the synchronisation layer.
///
/// Long-running components never surface these to their callers; they are
/// returned by construction, configuration and single-shot fetch helpers and
/// otherwise logged where they occur.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Push channel could not be opened or used
    #[error("Transport error: {0}")]
    Transport(String),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Snapshot request failed
    #[error("Snapshot request failed: {0}")]
    Http(#[from] utils::UtilsError),

    /// Channel was used after being closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RealtimeError {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            RealtimeError::Http(e) => e.is_transient(),
            RealtimeError::Transport(_)
            | RealtimeError::WebSocket(_)
            | RealtimeError::ChannelClosed => true,
            RealtimeError::Config(_) | RealtimeError::Serialization(_) => false,
        }
    }
}

/// Result type for realtime operations
pub type Result<T> = std::result::Result<T, RealtimeError>;
