//! One live worker instance and the tasks that service its pipes.
//!
//! A [`Connection`] owns the request queue and callback table for its worker.
//! Background tasks never touch either; they only report [`WorkerSignal`]s
//! tagged with the connection's generation, so signals from a worker that has
//! already been replaced are recognizable and ignored.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use tslink_types::{Request, ServerVersion};

use crate::codec::{FrameWriter, MessageFramer};
use crate::error::ClientError;
use crate::paths::PathMapper;
use crate::process::{LaunchPlan, WorkerHandle, WorkerInput, WorkerOutput, WorkerProcess};
use crate::queue::{CallbackTable, PendingCallback, QueuedRequest, RequestQueue};
use crate::tracer::Tracer;
use crate::types::RequestFraming;

const READ_CHUNK_BYTES: usize = 16 * 1024;

/// Report from a connection's background tasks.
#[derive(Debug)]
pub(crate) enum WorkerSignal {
    /// One complete frame body from stdout.
    Message { generation: u64, body: String },
    OutputClosed { generation: u64 },
    Failed { generation: u64, reason: String },
    Exited { generation: u64, code: Option<i32> },
}

impl WorkerSignal {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Message { generation, .. }
            | Self::OutputClosed { generation }
            | Self::Failed { generation, .. }
            | Self::Exited { generation, .. } => *generation,
        }
    }
}

enum WriterCommand {
    Send(Request),
    Shutdown,
}

/// How a cancellation request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelOutcome {
    /// Removed before it was written.
    Dequeued,
    /// Worker signalled out of band; the callback waits for its acknowledgement.
    Signalled,
    /// Already written and cannot be signalled; the caller was rejected locally.
    Rejected,
    /// Nothing outstanding under that seq.
    NotFound,
}

pub(crate) struct Connection {
    generation: u64,
    version: ServerVersion,
    mapper: PathMapper,
    queue: RequestQueue,
    callbacks: CallbackTable,
    /// Unbounded so the owner never waits on a worker that stopped reading.
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    kill_tx: Option<oneshot::Sender<()>>,
    cancellation_pipe: Option<PathBuf>,
    log_file: Option<PathBuf>,
}

impl Connection {
    /// Wire a freshly spawned worker to background tasks.
    pub fn open(
        process: WorkerProcess,
        plan: &LaunchPlan,
        generation: u64,
        framing: RequestFraming,
        signals: &mpsc::Sender<WorkerSignal>,
    ) -> Self {
        let WorkerProcess {
            stdin,
            stdout,
            stderr,
            handle,
        } = process;

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_requests(
            FrameWriter::new(stdin, framing),
            writer_rx,
            generation,
            signals.clone(),
        ));
        tokio::spawn(read_output(stdout, generation, signals.clone()));
        if let Some(stderr) = stderr {
            tokio::spawn(forward_stderr(stderr, generation));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(monitor_exit(handle, kill_rx, generation, signals.clone()));

        Self {
            generation,
            version: plan.version.clone(),
            mapper: PathMapper::new(plan.version.clone()),
            queue: RequestQueue::new(),
            callbacks: CallbackTable::new(),
            writer_tx,
            kill_tx: Some(kill_tx),
            cancellation_pipe: plan.cancellation_pipe.clone(),
            log_file: plan.log_file.clone(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn version(&self) -> &ServerVersion {
        &self.version
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    pub fn create_request(
        &mut self,
        command: impl Into<String>,
        arguments: Option<serde_json::Value>,
    ) -> Request {
        self.queue.create_request(command, arguments)
    }

    pub fn push(&mut self, item: QueuedRequest) {
        self.queue.push(item);
    }

    /// Write queued requests while no response is outstanding.
    pub fn drain(&mut self, tracer: &Tracer) {
        while self.callbacks.pending_responses() == 0 {
            let Some(item) = self.queue.shift() else {
                break;
            };
            tracer.trace_request(&item.request, item.expects_response(), self.queue.len());

            let (request, callback) = item.into_parts();
            let seq = request.seq;
            if self.writer_tx.send(WriterCommand::Send(request)).is_err() {
                if let Some(callback) = callback {
                    callback.resolve(Err(ClientError::service_died("worker input closed")));
                }
                continue;
            }
            if let Some(callback) = callback {
                self.callbacks.add(seq, callback);
            }
        }
    }

    /// Remove the callback for a response. Clears any cancellation sentinel.
    pub fn take_callback(&mut self, seq: u64) -> Option<PendingCallback> {
        let callback = self.callbacks.fetch(seq)?;
        if callback.cancel_requested()
            && let Some(pipe) = &self.cancellation_pipe
        {
            let _ = std::fs::remove_file(sentinel_path(pipe, seq));
        }
        Some(callback)
    }

    /// Cancel `seq`: dequeue it, signal the worker, or reject it locally.
    pub fn cancel(&mut self, seq: u64, tracer: &Tracer) -> CancelOutcome {
        if self.queue.try_cancel(seq) {
            tracer.log(&format!("Cancelled queued request {seq}"));
            return CancelOutcome::Dequeued;
        }
        if !self.callbacks.contains(seq) {
            return CancelOutcome::NotFound;
        }

        if self.version.supports(&ServerVersion::V222)
            && let Some(pipe) = &self.cancellation_pipe
        {
            let sentinel = sentinel_path(pipe, seq);
            match std::fs::write(&sentinel, "") {
                Ok(()) => {
                    self.callbacks.mark_cancel_requested(seq);
                    tracer.log(&format!("Requested cancellation of in-flight request {seq}"));
                    return CancelOutcome::Signalled;
                }
                Err(e) => tracing::warn!(
                    seq,
                    path = %sentinel.display(),
                    "Failed to write cancellation sentinel: {e}"
                ),
            }
        }

        if let Some(callback) = self.callbacks.fetch(seq) {
            callback.resolve(Err(ClientError::Cancelled { seq }));
        }
        tracer.log(&format!("Request {seq} was already delivered; rejected locally"));
        CancelOutcome::Rejected
    }

    /// Reject all outstanding work and stop the worker.
    pub fn close(mut self, reject: impl Fn(u64) -> ClientError) {
        self.queue.fail_all(&reject);
        self.callbacks.destroy(&reject);
        let _ = self.writer_tx.send(WriterCommand::Shutdown);
        if let Some(kill) = self.kill_tx.take() {
            let _ = kill.send(());
        }
    }
}

/// Sentinel file whose existence tells the worker to cancel `seq`.
pub(crate) fn sentinel_path(pipe: &Path, seq: u64) -> PathBuf {
    let mut name = OsString::from(pipe.as_os_str());
    name.push(seq.to_string());
    PathBuf::from(name)
}

async fn write_requests(
    mut writer: FrameWriter<WorkerInput>,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    generation: u64,
    signals: mpsc::Sender<WorkerSignal>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Send(request) => {
                if let Err(e) = writer.write_request(&request).await {
                    tracing::warn!(generation, "Worker write error: {e:#}");
                    let _ = signals
                        .send(WorkerSignal::Failed {
                            generation,
                            reason: format!("{e:#}"),
                        })
                        .await;
                    break;
                }
            }
            WriterCommand::Shutdown => break,
        }
    }
}

async fn read_output(
    mut stdout: WorkerOutput,
    generation: u64,
    signals: mpsc::Sender<WorkerSignal>,
) {
    let mut framer = MessageFramer::new();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let read = match stdout.read(&mut chunk).await {
            Ok(0) => {
                tracing::info!(generation, "Worker closed stdout");
                let _ = signals.send(WorkerSignal::OutputClosed { generation }).await;
                return;
            }
            Ok(read) => read,
            Err(e) => {
                let _ = signals
                    .send(WorkerSignal::Failed {
                        generation,
                        reason: format!("reading worker output: {e}"),
                    })
                    .await;
                return;
            }
        };

        match framer.push(&chunk[..read]) {
            Ok(messages) => {
                for body in messages {
                    if signals
                        .send(WorkerSignal::Message { generation, body })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(generation, "Invalid frame from worker: {e}");
                let _ = signals
                    .send(WorkerSignal::Failed {
                        generation,
                        reason: format!("invalid frame: {e}"),
                    })
                    .await;
                return;
            }
        }
    }
}

async fn forward_stderr(stderr: WorkerOutput, generation: u64) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(generation, "worker stderr: {line}");
    }
}

/// Report the worker's exit, or kill it once `kill` fires or is dropped.
async fn monitor_exit(
    mut handle: Box<dyn WorkerHandle>,
    kill: oneshot::Receiver<()>,
    generation: u64,
    signals: mpsc::Sender<WorkerSignal>,
) {
    tokio::select! {
        status = handle.wait() => {
            let signal = match status {
                Ok(code) => WorkerSignal::Exited { generation, code },
                Err(e) => WorkerSignal::Failed {
                    generation,
                    reason: format!("waiting for worker: {e}"),
                },
            };
            let _ = signals.send(signal).await;
        }
        _ = kill => {
            if let Err(e) = handle.start_kill() {
                tracing::debug!(generation, "Failed to kill worker: {e}");
            }
            let _ = handle.wait().await;
            tracing::debug!(generation, "Worker stopped");
        }
    }
}
