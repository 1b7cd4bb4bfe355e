//! Connection state machine
//!
//! Pure transition logic for one push-channel connection. The driver feeds
//! [`ConnectionEvent`]s in and carries out the returned [`Effect`]s; nothing
//! here touches the network or the clock.
//!
//! ```text
//! Disconnected --Connect--> Connecting --Opened--> Connected
//! Connecting|Connected --Failed / abnormal Closed--> Reconnecting | Failed
//! Reconnecting --RetryTimerFired--> Connecting
//! Connecting|Connected|Reconnecting|Failed --normal Closed--> Disconnected
//! any --Reconnect--> Connecting        any --Dispose--> Disconnected (terminal)
//! ```

use crate::backoff::{BackoffConfig, BackoffScheduler, BackoffStep};
use crate::transport::{is_normal_close, NORMAL_CLOSURE};
use crate::types::ConnectionState;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Input to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Caller asked to connect
    Connect,
    /// Transport reported the channel open
    Opened,
    /// Open failed, timed out, or the channel errored
    Failed(String),
    /// Channel closed by the peer
    Closed {
        /// Close code, if any
        code: Option<u16>,
    },
    /// Backoff timer elapsed
    RetryTimerFired,
    /// Manual reset: close, clear backoff, connect immediately
    Reconnect,
    /// Final shutdown
    Dispose,
}

/// Work the driver must perform after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open a new channel
    OpenChannel,
    /// Send the subscription handshake on the open channel
    SendHandshake,
    /// Arm the retry timer
    ScheduleRetry(Duration),
    /// Disarm the retry timer
    CancelRetry,
    /// Close the current channel (if any) with a close frame
    CloseChannel(u16),
    /// Drop the current channel (if any) without a close frame
    DiscardChannel,
}

/// State plus backoff counter of one connection
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    backoff: BackoffScheduler,
    disposed: bool,
}

impl ConnectionMachine {
    /// Create a machine in `Disconnected`
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            backoff: BackoffScheduler::new(backoff),
            disposed: false,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts consumed since the last successful open
    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    /// Whether `Dispose` has been handled
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Apply one event and return the effects to perform, in order.
    pub fn handle(&mut self, event: ConnectionEvent) -> Vec<Effect> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        if self.disposed {
            debug!(?event, "connection disposed, ignoring event");
            return Vec::new();
        }

        match (self.state, event) {
            (_, E::Dispose) => {
                self.disposed = true;
                self.state = S::Disconnected;
                vec![Effect::CancelRetry, Effect::CloseChannel(NORMAL_CLOSURE)]
            }
            (_, E::Reconnect) => {
                self.backoff.reset();
                self.state = S::Connecting;
                vec![
                    Effect::CancelRetry,
                    Effect::CloseChannel(NORMAL_CLOSURE),
                    Effect::OpenChannel,
                ]
            }
            (S::Disconnected, E::Connect) => {
                self.state = S::Connecting;
                vec![Effect::OpenChannel]
            }
            (S::Connecting, E::Opened) => {
                self.backoff.reset();
                self.state = S::Connected;
                vec![Effect::SendHandshake]
            }
            (S::Connecting | S::Connected, E::Failed(reason)) => {
                warn!(state = %self.state, %reason, "push channel failed");
                self.schedule_retry()
            }
            (S::Connecting | S::Connected, E::Closed { code }) if !is_normal_close(code) => {
                warn!(state = %self.state, ?code, "push channel closed abnormally");
                self.schedule_retry()
            }
            (S::Connecting | S::Connected | S::Reconnecting | S::Failed, E::Closed { code }) => {
                debug!(?code, "push channel closed normally");
                self.state = S::Disconnected;
                vec![Effect::CancelRetry, Effect::DiscardChannel]
            }
            (S::Reconnecting, E::RetryTimerFired) => {
                self.state = S::Connecting;
                vec![Effect::OpenChannel]
            }
            (state, event) => {
                debug!(%state, ?event, "event has no transition");
                Vec::new()
            }
        }
    }

    fn schedule_retry(&mut self) -> Vec<Effect> {
        match self.backoff.next_delay() {
            BackoffStep::Wait(delay) => {
                self.state = ConnectionState::Reconnecting;
                vec![Effect::DiscardChannel, Effect::ScheduleRetry(delay)]
            }
            BackoffStep::Exhausted => {
                error!(
                    attempts = self.backoff.attempts(),
                    "reconnect attempts exhausted"
                );
                self.state = ConnectionState::Failed;
                vec![Effect::DiscardChannel]
            }
        }
    }
}
