//! The service task: sole owner of the worker connection and all client state.
//!
//! Facade handles talk to it over a bounded command channel. Connection tasks
//! talk to it over a signal channel. Everything that touches the request
//! queue, the callback table, or the diagnostics cache runs here, one message
//! at a time.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

use tslink_types::{Response, ServerVersion};

use crate::channels::EventChannels;
use crate::connection::{CancelOutcome, Connection, WorkerSignal};
use crate::diagnostics::DiagnosticsStore;
use crate::dispatcher::Dispatcher;
use crate::error::{ClientError, ClientResult};
use crate::process::{LaunchPlan, WorkerLauncher, WorkerProcess};
use crate::queue::QueuedRequest;
use crate::supervisor::{Lifecycle, RestartDecision, RestartPolicy};
use crate::tracer::Tracer;
use crate::types::{DiagnosticsSnapshot, ServiceConfig, ServiceState};

/// Capacity of the channel between worker tasks and the service task.
const SIGNAL_CHANNEL_CAPACITY: usize = 256;

pub(crate) enum ClientCommand {
    Execute {
        command: String,
        arguments: Option<Value>,
        reply: oneshot::Sender<ClientResult<Admission>>,
    },
    Notify {
        command: String,
        arguments: Option<Value>,
    },
    Cancel {
        generation: u64,
        seq: u64,
    },
    EnsureStarted {
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Restart {
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Reconfigure {
        config: Box<ServiceConfig>,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    CloseDocument {
        resource: String,
    },
    Diagnostics {
        reply: oneshot::Sender<DiagnosticsSnapshot>,
    },
    ServerLogFile {
        reply: oneshot::Sender<ClientResult<PathBuf>>,
    },
    Dispose {
        reply: oneshot::Sender<()>,
    },
}

/// A request accepted into the queue of a specific worker generation.
pub(crate) struct Admission {
    pub generation: u64,
    pub seq: u64,
    pub response: oneshot::Receiver<ClientResult<Response>>,
}

pub(crate) struct Service {
    launcher: Arc<dyn WorkerLauncher>,
    config: ServiceConfig,
    workspace_root: PathBuf,
    commands: mpsc::Receiver<ClientCommand>,
    signals_tx: mpsc::Sender<WorkerSignal>,
    signals_rx: mpsc::Receiver<WorkerSignal>,
    connection: Option<Connection>,
    generation: u64,
    policy: RestartPolicy,
    lifecycle: Lifecycle,
    channels: Arc<EventChannels>,
    diagnostics: DiagnosticsStore,
    tracer: Tracer,
}

impl Service {
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        config: ServiceConfig,
        workspace_root: PathBuf,
        commands: mpsc::Receiver<ClientCommand>,
        lifecycle: Lifecycle,
        channels: Arc<EventChannels>,
    ) -> Self {
        let (signals_tx, signals_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let tracer = Tracer::new(config.trace);
        Self {
            launcher,
            config,
            workspace_root,
            commands,
            signals_tx,
            signals_rx,
            connection: None,
            generation: 0,
            policy: RestartPolicy::default(),
            lifecycle,
            channels,
            diagnostics: DiagnosticsStore::new(),
            tracer,
        }
    }

    /// Run until disposed or every facade handle is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("All client handles dropped; stopping worker");
                        self.shutdown();
                        break;
                    };
                    if self.handle_command(command).is_break() {
                        break;
                    }
                }
                Some(signal) = self.signals_rx.recv() => {
                    self.handle_signal(signal);
                }
            }
        }
    }

    fn handle_command(&mut self, command: ClientCommand) -> ControlFlow<()> {
        match command {
            ClientCommand::Execute {
                command,
                arguments,
                reply,
            } => {
                let admission = self.admit(command, arguments);
                let _ = reply.send(admission);
            }
            ClientCommand::Notify { command, arguments } => {
                if let Err(e) = self.ensure_running() {
                    tracing::warn!(%command, "Dropping notification: {e}");
                } else if let Some(connection) = self.connection.as_mut() {
                    let request = connection.create_request(command, arguments);
                    connection.push(QueuedRequest::notification(request));
                    connection.drain(&self.tracer);
                }
            }
            ClientCommand::Cancel { generation, seq } => self.cancel(generation, seq),
            ClientCommand::EnsureStarted { reply } => {
                let _ = reply.send(self.ensure_running());
            }
            ClientCommand::Restart { reply } => {
                let _ = reply.send(self.restart());
            }
            ClientCommand::Reconfigure { config, reply } => {
                let _ = reply.send(self.reconfigure(*config));
            }
            ClientCommand::CloseDocument { resource } => {
                self.diagnostics.remove(&resource);
            }
            ClientCommand::Diagnostics { reply } => {
                let _ = reply.send(self.diagnostics.snapshot());
            }
            ClientCommand::ServerLogFile { reply } => {
                let _ = reply.send(self.server_log_file());
            }
            ClientCommand::Dispose { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn handle_signal(&mut self, signal: WorkerSignal) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if connection.generation() != signal.generation() {
            tracing::trace!(
                generation = signal.generation(),
                current = connection.generation(),
                "Ignoring signal from replaced worker"
            );
            return;
        }

        match signal {
            WorkerSignal::Message { body, .. } => {
                let routed = Dispatcher {
                    channels: &self.channels,
                    diagnostics: &mut self.diagnostics,
                    tracer: &self.tracer,
                }
                .dispatch(connection, &body);
                match routed {
                    Ok(()) => connection.drain(&self.tracer),
                    Err(e) => self.worker_lost(ServiceState::Errored, e.to_string()),
                }
            }
            WorkerSignal::OutputClosed { .. } => {
                self.worker_lost(ServiceState::Exited, "worker output closed".to_string());
            }
            WorkerSignal::Exited { code, .. } => {
                let reason = match code {
                    Some(code) => format!("exit code {code}"),
                    None => "terminated by signal".to_string(),
                };
                self.worker_lost(ServiceState::Exited, reason);
            }
            WorkerSignal::Failed { reason, .. } => {
                self.worker_lost(ServiceState::Errored, reason);
            }
        }
    }

    /// Start the worker if nothing is running and the policy allows it.
    fn ensure_running(&mut self) -> ClientResult<()> {
        if self.connection.is_some() {
            return Ok(());
        }
        if self.lifecycle.state() == ServiceState::FailedPermanently {
            return Err(ClientError::ServiceUnavailable(
                "worker stopped after repeated crashes; restart it explicitly".to_string(),
            ));
        }
        self.start(false)
    }

    fn start(&mut self, resend_models: bool) -> ClientResult<()> {
        self.lifecycle.transition(ServiceState::Starting);

        let (plan, process) = match self.launch() {
            Ok(launched) => launched,
            Err(e) => {
                let message = format!("{e:#}");
                tracing::error!("Failed to start worker: {message}");
                self.lifecycle.transition(ServiceState::FailedPermanently);
                return Err(ClientError::Spawn(message));
            }
        };

        self.generation += 1;
        let connection = Connection::open(
            process,
            &plan,
            self.generation,
            self.config.request_framing,
            &self.signals_tx,
        );
        tracing::info!(
            generation = self.generation,
            version = %plan.version,
            server = %plan.server_path.display(),
            "Worker started"
        );
        self.connection = Some(connection);
        self.policy.on_start(Instant::now());
        self.lifecycle.set_version(plan.version.clone());
        self.lifecycle.transition(ServiceState::Running);

        self.handshake();
        self.channels.server_started.send(plan.version);
        if resend_models {
            self.channels.resend_models.send(());
        }
        Ok(())
    }

    fn launch(&self) -> anyhow::Result<(LaunchPlan, WorkerProcess)> {
        let installation = self
            .launcher
            .installation(&self.config, &self.workspace_root)?;
        let plan = LaunchPlan::build(&self.config, installation, &self.workspace_root);
        let process = self.launcher.launch(&plan)?;
        Ok((plan, process))
    }

    /// Queue the requests every fresh worker gets before any caller's.
    fn handshake(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if let Some(host_info) = self.config.host_info() {
            let request = connection.create_request("configure", Some(json!({ "hostInfo": host_info })));
            connection.push(QueuedRequest::discarding(request));
        }
        if connection.version().supports(&ServerVersion::V206)
            && let Some(options) = &self.config.compiler_options_for_inferred_projects
        {
            let request = connection.create_request(
                "compilerOptionsForInferredProjects",
                Some(json!({ "options": options })),
            );
            connection.push(QueuedRequest::notification(request));
        }
        connection.drain(&self.tracer);
    }

    fn admit(
        &mut self,
        command: String,
        arguments: Option<Value>,
    ) -> ClientResult<Admission> {
        self.ensure_running()?;
        let Some(connection) = self.connection.as_mut() else {
            return Err(ClientError::ServiceUnavailable(
                "worker is not running".to_string(),
            ));
        };

        let request = connection.create_request(command, arguments);
        let seq = request.seq;
        let (tx, rx) = oneshot::channel();
        connection.push(QueuedRequest::call(request, tx));
        connection.drain(&self.tracer);

        Ok(Admission {
            generation: connection.generation(),
            seq,
            response: rx,
        })
    }

    fn cancel(&mut self, generation: u64, seq: u64) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        // Requests of a replaced worker were already rejected when it went away.
        if connection.generation() != generation {
            return;
        }
        let outcome = connection.cancel(seq, &self.tracer);
        tracing::debug!(seq, ?outcome, "Cancellation handled");
        if outcome == CancelOutcome::Rejected {
            connection.drain(&self.tracer);
        }
    }

    /// Tear down a worker that died on its own and apply the crash-loop policy.
    fn worker_lost(&mut self, state: ServiceState, reason: String) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        tracing::warn!(generation = connection.generation(), "Worker lost: {reason}");
        connection.close(|_| ClientError::service_died(reason.clone()));
        self.diagnostics.clear();
        self.lifecycle.transition(state);

        match self.policy.on_unexpected_exit(Instant::now()) {
            RestartDecision::Restart => {}
            RestartDecision::RestartWithWarning => {
                tracing::warn!("Worker keeps dying; restarting anyway");
            }
            RestartDecision::GiveUp => {
                tracing::error!("Worker keeps crashing right after start; not restarting until asked");
                self.lifecycle.set_version(ServerVersion::DEFAULT);
                self.lifecycle.transition(ServiceState::FailedPermanently);
                return;
            }
        }
        if let Err(e) = self.start(true) {
            tracing::warn!("Restart after crash failed: {e}");
        }
    }

    /// User-requested restart. Outstanding work is rejected as cancelled.
    fn restart(&mut self) -> ClientResult<()> {
        if let Some(connection) = self.connection.take() {
            tracing::info!(generation = connection.generation(), "Restarting worker");
            connection.close(|seq| ClientError::Cancelled { seq });
            self.lifecycle.transition(ServiceState::Stopped);
        }
        self.diagnostics.clear();
        self.policy.reset();
        self.start(true)
    }

    fn reconfigure(&mut self, config: ServiceConfig) -> ClientResult<()> {
        let relaunch = self.connection.is_some() && self.config.requires_restart(&config);
        self.tracer = Tracer::new(config.trace);
        self.config = config;
        if relaunch {
            tracing::info!("Launch settings changed");
            self.restart()
        } else {
            Ok(())
        }
    }

    fn server_log_file(&self) -> ClientResult<PathBuf> {
        let Some(connection) = &self.connection else {
            return Err(ClientError::LogUnavailable(
                "worker is not running".to_string(),
            ));
        };
        if !connection.version().supports(&ServerVersion::V222) {
            return Err(ClientError::LogUnavailable(format!(
                "worker {} does not write a log file",
                connection.version()
            )));
        }
        let Some(path) = connection.log_file() else {
            return Err(ClientError::LogUnavailable("logging is off".to_string()));
        };
        if !path.exists() {
            return Err(ClientError::LogUnavailable(
                "worker has not started logging".to_string(),
            ));
        }
        Ok(path.to_path_buf())
    }

    fn shutdown(&mut self) {
        if let Some(connection) = self.connection.take() {
            tracing::info!(generation = connection.generation(), "Stopping worker");
            connection.close(|_| ClientError::Disposed);
        }
        self.diagnostics.clear();
        self.lifecycle.transition(ServiceState::Stopped);
    }
}
