//! In-memory fake tsserver for driving `TsClient` end to end.
//!
//! Each launch wires the client to a task that reads `\r\n`-terminated JSON
//! requests and answers with `Content-Length` frames. Commands:
//!
//! - `echo {value}` answers `{value: value + 1}`
//! - `slow {delay_ms}` answers after the delay
//! - `fail` answers `success: false` with message `boom`
//! - `emit {file}` pushes a `semanticDiag` event, then answers
//! - `hang` answers only once its cancellation sentinel appears
//! - `crash` closes stdout and exits with code 1
//! - `garbage` writes output without a `Content-Length` header
//! - `violate` writes a well-formed frame that is neither response nor event
//! - `configure` answers success; anything else without a response is ignored

#![allow(dead_code)]

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::oneshot;

use tslink_client::{
    Installation, LaunchPlan, ServerVersion, ServiceConfig, ServiceState, Subscription,
    WorkerHandle, WorkerLauncher, WorkerProcess, encode_frame,
};

/// Guard against hanging tests.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// What the fake worker saw and said, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Received { seq: u64, command: String },
    Answered { seq: u64 },
}

#[derive(Default)]
pub struct Transcript {
    records: Mutex<Vec<Record>>,
}

impl Transcript {
    fn push(&self, record: Record) {
        self.records.lock().unwrap().push(record);
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    pub fn received_commands(&self) -> Vec<(u64, String)> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                Record::Received { seq, command } => Some((seq, command)),
                Record::Answered { .. } => None,
            })
            .collect()
    }
}

pub struct FakeLauncher {
    version: ServerVersion,
    launches: AtomicUsize,
    crash_on_start: AtomicBool,
    missing_install: bool,
    deaf: bool,
    last_plan: Mutex<Option<LaunchPlan>>,
    pub transcript: Arc<Transcript>,
}

impl FakeLauncher {
    pub fn new(version: ServerVersion) -> Arc<Self> {
        Arc::new(Self {
            version,
            launches: AtomicUsize::new(0),
            crash_on_start: AtomicBool::new(false),
            missing_install: false,
            deaf: false,
            last_plan: Mutex::new(None),
            transcript: Arc::new(Transcript::default()),
        })
    }

    /// A launcher whose installation lookup always fails.
    pub fn missing() -> Arc<Self> {
        Arc::new(Self {
            version: ServerVersion::new(3, 0, 0),
            launches: AtomicUsize::new(0),
            crash_on_start: AtomicBool::new(false),
            missing_install: true,
            deaf: false,
            last_plan: Mutex::new(None),
            transcript: Arc::new(Transcript::default()),
        })
    }

    /// A launcher whose workers never read stdin, over tiny pipes.
    pub fn deaf() -> Arc<Self> {
        Arc::new(Self {
            version: ServerVersion::new(3, 0, 0),
            launches: AtomicUsize::new(0),
            crash_on_start: AtomicBool::new(false),
            missing_install: false,
            deaf: true,
            last_plan: Mutex::new(None),
            transcript: Arc::new(Transcript::default()),
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn set_crash_on_start(&self, crash: bool) {
        self.crash_on_start.store(crash, Ordering::SeqCst);
    }

    pub fn last_plan(&self) -> Option<LaunchPlan> {
        self.last_plan.lock().unwrap().clone()
    }
}

impl WorkerLauncher for FakeLauncher {
    fn installation(
        &self,
        _config: &ServiceConfig,
        workspace_root: &Path,
    ) -> anyhow::Result<Installation> {
        if self.missing_install {
            bail!(
                "no TypeScript installation found (checked {})",
                workspace_root.display()
            );
        }
        Ok(Installation {
            server_path: PathBuf::from("/fake/typescript/lib/tsserver.js"),
            version: self.version.clone(),
        })
    }

    fn launch(&self, plan: &LaunchPlan) -> anyhow::Result<WorkerProcess> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.last_plan.lock().unwrap() = Some(plan.clone());

        if let Some(log_file) = &plan.log_file {
            std::fs::write(log_file, "Info 0 [00:00:00.000] Starting TS Server\n")?;
        }

        let pipe_size = if self.deaf { 16 } else { 64 * 1024 };
        let (client_stdin, worker_stdin) = tokio::io::duplex(pipe_size);
        let (worker_stdout, client_stdout) = tokio::io::duplex(pipe_size);
        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        let worker = FakeWorker {
            output: worker_stdout,
            cancellation_pipe: plan.cancellation_pipe.clone(),
            transcript: Arc::clone(&self.transcript),
        };
        let crash_on_start = self.crash_on_start.load(Ordering::SeqCst);
        let deaf = self.deaf;
        tokio::spawn(async move {
            let code = if crash_on_start {
                drop(worker);
                Some(1)
            } else if deaf {
                // Hold both pipe ends open without ever reading.
                let _ = kill_rx.await;
                drop((worker, worker_stdin));
                None
            } else {
                tokio::select! {
                    code = worker.serve(worker_stdin) => code,
                    _ = kill_rx => None,
                }
            };
            let _ = exit_tx.send(code);
        });

        Ok(WorkerProcess {
            stdin: Box::new(client_stdin),
            stdout: Box::new(client_stdout),
            stderr: None,
            handle: Box::new(FakeHandle {
                exit: Some(exit_rx),
                kill: Some(kill_tx),
            }),
        })
    }
}

struct FakeHandle {
    exit: Option<oneshot::Receiver<Option<i32>>>,
    kill: Option<oneshot::Sender<()>>,
}

impl WorkerHandle for FakeHandle {
    fn wait(&mut self) -> BoxFuture<'_, std::io::Result<Option<i32>>> {
        Box::pin(async move {
            let code = match self.exit.as_mut() {
                Some(exit) => exit.await.unwrap_or(None),
                None => None,
            };
            self.exit = None;
            Ok(code)
        })
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        Ok(())
    }
}

struct FakeWorker {
    output: DuplexStream,
    cancellation_pipe: Option<PathBuf>,
    transcript: Arc<Transcript>,
}

impl FakeWorker {
    /// Serve requests until stdin closes (`Some(0)`) or a `crash` (`Some(1)`).
    async fn serve(mut self, input: DuplexStream) -> Option<i32> {
        let mut lines = BufReader::new(input).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = match serde_json::from_str(line.trim()) {
                Ok(request) => request,
                Err(_) => continue,
            };
            let seq = request["seq"].as_u64().unwrap_or_default();
            let command = request["command"].as_str().unwrap_or_default().to_string();
            let arguments = request.get("arguments").cloned().unwrap_or(Value::Null);
            self.transcript.push(Record::Received {
                seq,
                command: command.clone(),
            });

            match command.as_str() {
                "echo" => {
                    let value = arguments["value"].as_i64().unwrap_or_default();
                    self.answer(seq, &command, true, None, Some(json!({ "value": value + 1 })))
                        .await;
                }
                "slow" => {
                    let delay = arguments["delay_ms"].as_u64().unwrap_or(50);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    self.answer(seq, &command, true, None, Some(arguments)).await;
                }
                "fail" => self.answer(seq, &command, false, Some("boom"), None).await,
                "emit" => {
                    let file = arguments["file"].as_str().unwrap_or("/repo/a.ts");
                    self.event(
                        "semanticDiag",
                        json!({
                            "file": file,
                            "diagnostics": [{
                                "start": {"line": 1, "offset": 1},
                                "end": {"line": 1, "offset": 4},
                                "text": "Cannot find name 'foo'.",
                                "code": 2304,
                                "category": "error"
                            }]
                        }),
                    )
                    .await;
                    self.answer(seq, &command, true, None, None).await;
                }
                "hang" => {
                    self.wait_for_cancellation(seq).await;
                    self.answer(seq, &command, false, Some("Request cancelled"), None)
                        .await;
                }
                "crash" => return Some(1),
                "garbage" => {
                    let _ = self
                        .output
                        .write_all(b"Content-Type: bogus\r\n\r\n{}")
                        .await;
                }
                "violate" => {
                    self.write(&json!({ "seq": 0, "type": "request", "command": "x" }))
                        .await;
                }
                "configure" => self.answer(seq, &command, true, None, None).await,
                _ => {}
            }
        }
        Some(0)
    }

    async fn wait_for_cancellation(&self, seq: u64) {
        let Some(pipe) = &self.cancellation_pipe else {
            std::future::pending::<()>().await;
            return;
        };
        let mut sentinel = OsString::from(pipe.as_os_str());
        sentinel.push(seq.to_string());
        let sentinel = PathBuf::from(sentinel);
        while !sentinel.exists() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn answer(
        &mut self,
        seq: u64,
        command: &str,
        success: bool,
        message: Option<&str>,
        body: Option<Value>,
    ) {
        let mut response = json!({
            "seq": 0,
            "type": "response",
            "command": command,
            "request_seq": seq,
            "success": success,
        });
        if let Some(message) = message {
            response["message"] = json!(message);
        }
        if let Some(body) = body {
            response["body"] = body;
        }
        self.transcript.push(Record::Answered { seq });
        self.write(&response).await;
    }

    async fn event(&mut self, event: &str, body: Value) {
        self.write(&json!({ "seq": 0, "type": "event", "event": event, "body": body }))
            .await;
    }

    async fn write(&mut self, message: &Value) {
        let _ = self
            .output
            .write_all(&encode_frame(&message.to_string()))
            .await;
    }
}

/// Configuration without the post-start handshake, so caller requests start at seq 0.
pub fn quiet_config() -> ServiceConfig {
    ServiceConfig {
        host_info: None,
        compiler_options_for_inferred_projects: None,
        ..ServiceConfig::default()
    }
}

/// Receive from a subscription, failing the test on timeout.
pub async fn next<T: Clone>(subscription: &mut Subscription<T>) -> T {
    tokio::time::timeout(TIMEOUT, subscription.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Wait until the lifecycle stream reports `state`.
pub async fn wait_for_state(states: &mut Subscription<ServiceState>, state: ServiceState) {
    loop {
        if next(states).await == state {
            return;
        }
    }
}
