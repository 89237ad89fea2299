//! Typed event channels exposed to embedders.
//!
//! One broadcast channel per event kind. Subscribing returns a
//! [`Subscription`]; dropping it unsubscribes. There is no global registry:
//! the channels live on the client that created them.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use tslink_types::{
    BeginInstallTypesBody, ConfigFileDiagnosticBody, EndInstallTypesBody,
    ProjectLanguageServiceStateBody, ServerVersion, TypesInstallerInitializationFailedBody,
};

use crate::types::{DiagnosticsEvent, ServiceState};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Fan-out channel for one event kind. Clones publish to the same subscribers.
#[derive(Debug, Clone)]
pub struct EventChannel<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> EventChannel<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire the event. Having no subscribers is not an error.
    pub(crate) fn send(&self, value: T) {
        let _ = self.tx.send(value);
    }

    #[must_use]
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving end of an [`EventChannel`].
///
/// A subscriber that falls more than the channel capacity behind skips the
/// oldest events and keeps going.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Wait for the next event. `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(value) => return Some(value),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged; dropping oldest events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(value) => return Some(value),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged; dropping oldest events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

/// Every event stream the client publishes.
#[derive(Debug)]
pub struct EventChannels {
    /// Fired after each successful start with the negotiated version.
    pub server_started: EventChannel<ServerVersion>,
    pub state: EventChannel<ServiceState>,
    pub diagnostics: EventChannel<DiagnosticsEvent>,
    pub config_diagnostics: EventChannel<ConfigFileDiagnosticBody>,
    pub project_state: EventChannel<ProjectLanguageServiceStateBody>,
    pub begin_install_types: EventChannel<BeginInstallTypesBody>,
    pub end_install_types: EventChannel<EndInstallTypesBody>,
    pub installer_initialization_failed: EventChannel<TypesInstallerInitializationFailedBody>,
    /// Fired after a restart; in-memory documents must be sent again.
    pub resend_models: EventChannel<()>,
}

impl EventChannels {
    pub(crate) fn new() -> Self {
        Self {
            server_started: EventChannel::new(EVENT_CHANNEL_CAPACITY),
            state: EventChannel::new(EVENT_CHANNEL_CAPACITY),
            diagnostics: EventChannel::new(EVENT_CHANNEL_CAPACITY),
            config_diagnostics: EventChannel::new(EVENT_CHANNEL_CAPACITY),
            project_state: EventChannel::new(EVENT_CHANNEL_CAPACITY),
            begin_install_types: EventChannel::new(EVENT_CHANNEL_CAPACITY),
            end_install_types: EventChannel::new(EVENT_CHANNEL_CAPACITY),
            installer_initialization_failed: EventChannel::new(EVENT_CHANNEL_CAPACITY),
            resend_models: EventChannel::new(EVENT_CHANNEL_CAPACITY),
        }
    }
}
