//! Single merge point for both update paths.
//!
//! The connection driver and the fallback poller each hold a clone of the same
//! [`UpdateSink`]. Updates are applied last-write-wins in arrival order; the
//! sink remembers when the last one arrived so the poller can detect a stale
//! push channel.

use crate::progress::TaskProgressView;
use crate::types::TaskSnapshot;
use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};
use utils::clock::SharedClock;

/// Which path delivered an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateSource {
    /// Push channel message
    Push,
    /// Fallback poll
    Poll,
    /// One-shot fetch made when the subscription starts
    InitialFetch,
}

impl fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateSource::Push => write!(f, "push"),
            UpdateSource::Poll => write!(f, "poll"),
            UpdateSource::InitialFetch => write!(f, "initial_fetch"),
        }
    }
}

/// Callback receiving every accepted snapshot
pub type UpdateCallback = Arc<dyn Fn(&TaskSnapshot) + Send + Sync>;

/// Callback receiving the view derived from every accepted snapshot
pub type ProgressCallback = Arc<dyn Fn(&TaskProgressView) + Send + Sync>;

#[derive(Default)]
struct SinkState {
    last_update: Option<Instant>,
    last_snapshot: Option<TaskSnapshot>,
    terminal: bool,
}

struct SinkInner {
    task_id: String,
    clock: SharedClock,
    state: Mutex<SinkState>,
    update_listeners: Mutex<Vec<UpdateCallback>>,
    progress_listeners: Mutex<Vec<ProgressCallback>>,
    view_tx: watch::Sender<TaskProgressView>,
    /// Held for a whole delivery and by `close`, so closing waits for an
    /// in-flight fan-out. Reentrant so a listener may close the sink.
    delivery: ReentrantMutex<()>,
    closed: AtomicBool,
}

/// Shared update sink for one task.
#[derive(Clone)]
pub struct UpdateSink {
    inner: Arc<SinkInner>,
}

impl fmt::Debug for UpdateSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateSink")
            .field("task_id", &self.inner.task_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl UpdateSink {
    /// Create a sink for `task_id`
    pub fn new(task_id: impl Into<String>, clock: SharedClock) -> Self {
        let task_id = task_id.into();
        let (view_tx, _) = watch::channel(TaskProgressView::empty(task_id.clone()));
        Self {
            inner: Arc::new(SinkInner {
                task_id,
                clock,
                state: Mutex::new(SinkState::default()),
                update_listeners: Mutex::new(Vec::new()),
                progress_listeners: Mutex::new(Vec::new()),
                view_tx,
                delivery: ReentrantMutex::new(()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Task this sink accepts updates for
    pub fn task_id(&self) -> &str {
        &self.inner.task_id
    }

    /// Register a raw snapshot callback
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(&TaskSnapshot) + Send + Sync + 'static,
    {
        self.inner.update_listeners.lock().push(Arc::new(callback));
    }

    /// Register a progress view callback
    pub fn on_progress<F>(&self, callback: F)
    where
        F: Fn(&TaskProgressView) + Send + Sync + 'static,
    {
        self.inner.progress_listeners.lock().push(Arc::new(callback));
    }

    /// Watch the latest progress view
    pub fn progress(&self) -> watch::Receiver<TaskProgressView> {
        self.inner.view_tx.subscribe()
    }

    /// Latest progress view
    pub fn current_view(&self) -> TaskProgressView {
        self.inner.view_tx.borrow().clone()
    }

    /// Latest accepted snapshot
    pub fn last_snapshot(&self) -> Option<TaskSnapshot> {
        self.inner.state.lock().last_snapshot.clone()
    }

    /// Arrival time of the latest accepted update
    pub fn last_update(&self) -> Option<Instant> {
        self.inner.state.lock().last_update
    }

    /// Whether a completed or failed snapshot has been accepted
    pub fn is_terminal(&self) -> bool {
        self.inner.state.lock().terminal
    }

    /// Stop accepting updates. Idempotent.
    ///
    /// Waits for a delivery running on another thread, so no listener is
    /// called once this returns.
    pub fn close(&self) {
        let _delivery = self.inner.delivery.lock();
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!(task_id = %self.inner.task_id, "update sink closed");
        }
    }

    /// Whether the sink has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Apply one snapshot and notify listeners.
    ///
    /// Returns `false` when the update was not applied: the sink is closed,
    /// the snapshot names another task, or it is an initial fetch that lost
    /// the race against a live update.
    pub fn deliver(&self, mut snapshot: TaskSnapshot, source: UpdateSource) -> bool {
        let _delivery = self.inner.delivery.lock();
        if self.is_closed() {
            debug!(task_id = %self.inner.task_id, %source, "sink closed, dropping update");
            return false;
        }
        if snapshot.task_id != self.inner.task_id {
            warn!(
                task_id = %self.inner.task_id,
                other = %snapshot.task_id,
                %source,
                "dropping update for another task"
            );
            return false;
        }

        snapshot.normalize();
        let view = TaskProgressView::from_snapshot(&snapshot);

        {
            let mut state = self.inner.state.lock();
            if source == UpdateSource::InitialFetch && state.last_update.is_some() {
                debug!(task_id = %self.inner.task_id, "initial fetch superseded by live update");
                return false;
            }
            state.last_update = Some(self.inner.clock.now());
            state.terminal = snapshot.status.is_terminal();
            state.last_snapshot = Some(snapshot.clone());
        }

        debug!(
            task_id = %self.inner.task_id,
            %source,
            status = %snapshot.status,
            progress = view.overall_progress,
            "update applied"
        );

        let update_listeners = self.inner.update_listeners.lock().clone();
        for listener in &update_listeners {
            if self.is_closed() {
                return true;
            }
            listener(&snapshot);
        }
        let progress_listeners = self.inner.progress_listeners.lock().clone();
        for listener in &progress_listeners {
            if self.is_closed() {
                return true;
            }
            listener(&view);
        }
        if !self.is_closed() {
            self.inner.view_tx.send_replace(view);
        }

        true
    }
}
