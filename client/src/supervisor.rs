//! Crash-loop policy and lifecycle state for the worker process.

use std::time::{Duration, Instant};

use tokio::sync::watch;

use tslink_types::ServerVersion;

use crate::channels::EventChannel;
use crate::types::ServiceState;

/// Restarts tolerated before the policy looks at how long the worker lived.
const MAX_RESTARTS: u32 = 5;

/// A worker that dies this soon after starting, too often, is crash-looping.
const CRASH_LOOP_WINDOW: Duration = Duration::from_secs(10);

/// A worker that lived this long resets the restart counter.
const HEALTHY_RUN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RestartDecision {
    Restart,
    /// Restart, but the worker has been dying repeatedly.
    RestartWithWarning,
    /// Stop restarting until an explicit restart.
    GiveUp,
}

/// Restart counter and last-start timestamp.
///
/// Time is passed in by the caller so tests can simulate any exit schedule.
#[derive(Debug, Default)]
pub(crate) struct RestartPolicy {
    restarts: u32,
    last_start: Option<Instant>,
}

impl RestartPolicy {
    pub fn on_start(&mut self, now: Instant) {
        self.last_start = Some(now);
    }

    /// Forget previous crashes, e.g. after a user-requested restart.
    pub fn reset(&mut self) {
        self.restarts = 0;
    }

    pub fn on_unexpected_exit(&mut self, now: Instant) -> RestartDecision {
        let lived = self
            .last_start
            .map_or(Duration::ZERO, |start| now.saturating_duration_since(start));
        if lived >= HEALTHY_RUN {
            self.restarts = 0;
        }
        self.restarts += 1;

        if self.restarts <= MAX_RESTARTS {
            return RestartDecision::Restart;
        }

        self.restarts = 0;
        if lived < CRASH_LOOP_WINDOW {
            RestartDecision::GiveUp
        } else {
            RestartDecision::RestartWithWarning
        }
    }
}

/// Snapshot published to facade handles.
#[derive(Debug, Clone)]
pub(crate) struct ServiceStatus {
    pub state: ServiceState,
    pub version: ServerVersion,
}

/// Owns the current [`ServiceState`] and publishes every transition.
pub(crate) struct Lifecycle {
    status: watch::Sender<ServiceStatus>,
    transitions: EventChannel<ServiceState>,
}

impl Lifecycle {
    pub fn new(transitions: EventChannel<ServiceState>) -> (Self, watch::Receiver<ServiceStatus>) {
        let (status, status_rx) = watch::channel(ServiceStatus {
            state: ServiceState::Stopped,
            version: ServerVersion::DEFAULT,
        });
        (
            Self {
                status,
                transitions,
            },
            status_rx,
        )
    }

    pub fn state(&self) -> ServiceState {
        self.status.borrow().state
    }

    pub fn transition(&self, next: ServiceState) {
        let previous = self.state();
        if previous == next {
            return;
        }
        tracing::debug!(from = ?previous, to = ?next, "Service state changed");
        self.status.send_modify(|status| status.state = next);
        self.transitions.send(next);
    }

    pub fn set_version(&self, version: ServerVersion) {
        self.status.send_modify(|status| status.version = version);
    }
}
