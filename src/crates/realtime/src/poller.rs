//! Fallback poller
//!
//! A liveness backstop for the push channel. On every tick the poller fetches
//! a full snapshot only if the connection is not `Connected` or nothing has
//! arrived for longer than the stale threshold; while the push channel is
//! healthy it stays silent.

use crate::sink::{UpdateSink, UpdateSource};
use crate::types::{ConnectionState, TaskSnapshot};
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use utils::clock::SharedClock;

/// Default time between ticks
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Default age after which the push channel counts as stale
pub const DEFAULT_STALE_THRESHOLD_MS: u64 = 10_000;

/// Fetches a full task snapshot.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the current snapshot of `task_id`
    async fn fetch(&self, task_id: &str) -> Result<TaskSnapshot>;
}

/// Poller timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Time between ticks in milliseconds
    pub interval_ms: u64,

    /// Age of the last update after which a poll is forced, in milliseconds
    pub stale_threshold_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            stale_threshold_ms: DEFAULT_STALE_THRESHOLD_MS,
        }
    }
}

impl PollerConfig {
    /// Tick interval
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Stale threshold
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_threshold_ms)
    }
}

/// Whether a tick at `now` should poll.
///
/// Without any update yet, staleness is measured from `started_at`.
pub fn should_poll(
    state: ConnectionState,
    last_update: Option<Instant>,
    started_at: Instant,
    now: Instant,
    stale_threshold: Duration,
) -> bool {
    if !state.is_connected() {
        return true;
    }
    let reference = last_update.unwrap_or(started_at);
    now.saturating_duration_since(reference) > stale_threshold
}

struct PollerRun {
    stopped: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Periodic snapshot fetcher for one task.
///
/// Dropping the poller stops it.
pub struct FallbackPoller {
    source: Arc<dyn SnapshotSource>,
    sink: UpdateSink,
    connection: watch::Receiver<ConnectionState>,
    clock: SharedClock,
    run: Mutex<Option<PollerRun>>,
}

impl FallbackPoller {
    /// Create an idle poller.
    ///
    /// `connection` reports the health of the push channel it backs up.
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        sink: UpdateSink,
        connection: watch::Receiver<ConnectionState>,
        clock: SharedClock,
    ) -> Self {
        Self {
            source,
            sink,
            connection,
            clock,
            run: Mutex::new(None),
        }
    }

    /// Start ticking every `interval`. Restarts if already running.
    ///
    /// The first tick happens one interval after the call. Must be called
    /// inside a tokio runtime.
    pub fn start(&self, task_id: &str, interval: Duration, stale_threshold: Duration) {
        self.stop();

        if interval.is_zero() {
            warn!(task_id, "poll interval is zero, poller not started");
            return;
        }

        let stopped = Arc::new(AtomicBool::new(false));
        let worker = PollWorker {
            task_id: task_id.to_string(),
            interval,
            stale_threshold,
            source: self.source.clone(),
            sink: self.sink.clone(),
            connection: self.connection.clone(),
            clock: self.clock.clone(),
            stopped: stopped.clone(),
        };

        info!(
            task_id,
            interval_ms = interval.as_millis() as u64,
            stale_threshold_ms = stale_threshold.as_millis() as u64,
            "fallback poller started"
        );
        let handle = tokio::spawn(worker.run());
        *self.run.lock() = Some(PollerRun { stopped, handle });
    }

    /// Start with timings from `config`
    pub fn start_with(&self, task_id: &str, config: &PollerConfig) {
        self.start(task_id, config.interval(), config.stale_threshold());
    }

    /// Stop ticking. Idempotent; no update is delivered after this returns.
    pub fn stop(&self) {
        if let Some(run) = self.run.lock().take() {
            run.stopped.store(true, Ordering::SeqCst);
            run.handle.abort();
            debug!(task_id = %self.sink.task_id(), "fallback poller stopped");
        }
    }

    /// Whether the poll loop is still running
    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .as_ref()
            .map(|run| !run.handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for FallbackPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollWorker {
    task_id: String,
    interval: Duration,
    stale_threshold: Duration,
    source: Arc<dyn SnapshotSource>,
    sink: UpdateSink,
    connection: watch::Receiver<ConnectionState>,
    clock: SharedClock,
    stopped: Arc<AtomicBool>,
}

impl PollWorker {
    async fn run(self) {
        let started_at = self.clock.now();
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if self.stopped.load(Ordering::SeqCst) || self.sink.is_closed() {
                break;
            }
            if self.sink.is_terminal() {
                info!(task_id = %self.task_id, "task finished, poller exiting");
                break;
            }

            let state = *self.connection.borrow();
            let poll = should_poll(
                state,
                self.sink.last_update(),
                started_at,
                self.clock.now(),
                self.stale_threshold,
            );
            if !poll {
                continue;
            }

            debug!(task_id = %self.task_id, %state, "polling snapshot");
            match self.source.fetch(&self.task_id).await {
                Ok(snapshot) => {
                    if self.stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    self.sink.deliver(snapshot, UpdateSource::Poll);
                }
                Err(e) => {
                    warn!(
                        task_id = %self.task_id,
                        error = %e,
                        transient = e.is_transient(),
                        "poll failed, retrying next tick"
                    );
                }
            }
        }
    }
}
