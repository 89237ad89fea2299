//! Errors surfaced to callers of the client facade.

use serde_json::Value;
use thiserror::Error;

/// Outcome of a rejected request or lifecycle operation.
///
/// `Clone` because tearing down a connection rejects every outstanding
/// request with the same error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// The worker exited or errored while the request was queued or in flight.
    #[error("service died: {reason}")]
    ServiceDied { reason: String },

    /// The caller cancelled the request.
    #[error("cancelled request {seq}")]
    Cancelled { seq: u64 },

    /// The worker answered with `success: false`.
    #[error("'{command}' request failed: {message}")]
    RequestFailed {
        command: String,
        message: String,
        body: Option<Value>,
    },

    /// The worker could not be located or launched.
    #[error("failed to start worker: {0}")]
    Spawn(String),

    /// The crash-loop policy gave up; only an explicit restart recovers.
    #[error("worker unavailable: {0}")]
    ServiceUnavailable(String),

    /// The worker wrote something that is not a response or an event.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The client was disposed before the operation completed.
    #[error("client disposed")]
    Disposed,

    #[error("worker log unavailable: {0}")]
    LogUnavailable(String),
}

impl ClientError {
    pub(crate) fn service_died(reason: impl Into<String>) -> Self {
        Self::ServiceDied {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
