//! Request queue and callback table for one worker connection.
//!
//! The queue assigns sequence numbers and holds requests that have not been
//! written yet. The callback table holds the completion side of requests that
//! have been written and still await a response. Both are owned by exactly one
//! [`Connection`](crate::connection::Connection) and die with it.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::oneshot;

use tslink_types::{Request, Response};

use crate::error::{ClientError, ClientResult};

/// Completion handle for a caller waiting on a response.
pub(crate) type Responder = oneshot::Sender<ClientResult<Response>>;

/// A request that has been created but not yet written to the worker.
pub(crate) struct QueuedRequest {
    pub request: Request,
    expects_response: bool,
    responder: Option<Responder>,
}

impl QueuedRequest {
    /// A request whose response is delivered to `responder`.
    pub fn call(request: Request, responder: Responder) -> Self {
        Self {
            request,
            expects_response: true,
            responder: Some(responder),
        }
    }

    /// A request that occupies the single-flight slot but whose response
    /// nobody reads.
    pub fn discarding(request: Request) -> Self {
        Self {
            request,
            expects_response: true,
            responder: None,
        }
    }

    /// A fire-and-forget request. No callback is registered for it.
    pub fn notification(request: Request) -> Self {
        Self {
            request,
            expects_response: false,
            responder: None,
        }
    }

    pub fn expects_response(&self) -> bool {
        self.expects_response
    }

    pub fn seq(&self) -> u64 {
        self.request.seq
    }

    /// Split into the request to write and, if a response is expected, the
    /// callback to register for it.
    pub fn into_parts(self) -> (Request, Option<PendingCallback>) {
        let callback = self.expects_response.then(|| PendingCallback {
            command: self.request.command.clone(),
            responder: self.responder,
            issued_at: Instant::now(),
            cancel_requested: false,
        });
        (self.request, callback)
    }

    pub fn reject(self, error: ClientError) {
        if let Some(responder) = self.responder {
            let _ = responder.send(Err(error));
        }
    }
}

/// FIFO of unsent requests. Sequence numbers start at 0 for every connection.
pub(crate) struct RequestQueue {
    next_seq: u64,
    pending: VecDeque<QueuedRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            next_seq: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn create_request(
        &mut self,
        command: impl Into<String>,
        arguments: Option<Value>,
    ) -> Request {
        let seq = self.next_seq;
        self.next_seq += 1;
        Request::new(seq, command, arguments)
    }

    pub fn push(&mut self, item: QueuedRequest) {
        self.pending.push_back(item);
    }

    pub fn shift(&mut self) -> Option<QueuedRequest> {
        self.pending.pop_front()
    }

    /// Remove a still-queued request, rejecting its caller with `Cancelled`.
    ///
    /// Returns `false` if the request was already written (or never existed).
    pub fn try_cancel(&mut self, seq: u64) -> bool {
        let Some(index) = self.pending.iter().position(|item| item.seq() == seq) else {
            return false;
        };
        if let Some(item) = self.pending.remove(index) {
            item.reject(ClientError::Cancelled { seq });
        }
        true
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Reject every unsent request.
    pub fn fail_all(&mut self, reject: impl Fn(u64) -> ClientError) {
        for item in self.pending.drain(..) {
            let seq = item.seq();
            item.reject(reject(seq));
        }
    }
}

/// Completion state of one written request.
pub(crate) struct PendingCallback {
    command: String,
    responder: Option<Responder>,
    issued_at: Instant,
    cancel_requested: bool,
}

impl PendingCallback {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn resolve(self, result: ClientResult<Response>) {
        if let Some(responder) = self.responder {
            let _ = responder.send(result);
        }
    }
}

/// Outstanding callbacks keyed by request sequence number.
pub(crate) struct CallbackTable {
    callbacks: HashMap<u64, PendingCallback>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self {
            callbacks: HashMap::new(),
        }
    }

    pub fn add(&mut self, seq: u64, callback: PendingCallback) {
        self.callbacks.insert(seq, callback);
    }

    /// Remove and return the callback. A second fetch for the same seq is `None`.
    pub fn fetch(&mut self, seq: u64) -> Option<PendingCallback> {
        self.callbacks.remove(&seq)
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.callbacks.contains_key(&seq)
    }

    /// Record that the worker was asked to cancel `seq` out of band.
    pub fn mark_cancel_requested(&mut self, seq: u64) -> bool {
        match self.callbacks.get_mut(&seq) {
            Some(callback) => {
                callback.cancel_requested = true;
                true
            }
            None => false,
        }
    }

    pub fn pending_responses(&self) -> usize {
        self.callbacks.len()
    }

    /// Reject every pending callback and reset the table.
    pub fn destroy(&mut self, reject: impl Fn(u64) -> ClientError) {
        for (seq, callback) in self.callbacks.drain() {
            callback.resolve(Err(reject(seq)));
        }
    }
}
