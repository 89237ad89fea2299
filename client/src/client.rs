//! `TsClient` facade: the public API of the client.
//!
//! A `TsClient` is a cheap, cloneable handle to the service task. Every
//! method is a message to that task, so handles can be used concurrently
//! from anywhere without locks.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use tslink_types::{Response, ServerVersion};

use crate::channels::EventChannels;
use crate::error::{ClientError, ClientResult};
use crate::paths::PathMapper;
use crate::process::{NodeLauncher, WorkerLauncher};
use crate::service::{Admission, ClientCommand, Service};
use crate::supervisor::{Lifecycle, ServiceStatus};
use crate::types::{DiagnosticsSnapshot, ServiceConfig, ServiceState};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Handle to a supervised tsserver worker.
///
/// The worker is started lazily by the first [`execute`](Self::execute) or
/// explicitly by [`ensure_started`](Self::ensure_started). Dropping the last
/// handle stops it.
#[derive(Clone)]
pub struct TsClient {
    commands: mpsc::Sender<ClientCommand>,
    status: watch::Receiver<ServiceStatus>,
    channels: Arc<EventChannels>,
}

impl TsClient {
    /// Create a client that runs `tsserver.js` under Node.js.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ServiceConfig, workspace_root: impl Into<PathBuf>) -> Self {
        Self::with_launcher(config, workspace_root, Arc::new(NodeLauncher))
    }

    /// Create a client with a custom launcher, e.g. an in-process fake worker.
    pub fn with_launcher(
        config: ServiceConfig,
        workspace_root: impl Into<PathBuf>,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        let channels = Arc::new(EventChannels::new());
        let (lifecycle, status) = Lifecycle::new(channels.state.clone());
        let (commands, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let service = Service::new(
            launcher,
            config,
            workspace_root.into(),
            commands_rx,
            lifecycle,
            Arc::clone(&channels),
        );
        tokio::spawn(service.run());

        Self {
            commands,
            status,
            channels,
        }
    }

    /// Send `command` to the worker and wait for its response.
    ///
    /// When `token` fires before the response arrives the request is
    /// cancelled: dropped from the queue if unsent, otherwise signalled to
    /// the worker. Either way the call resolves with
    /// [`ClientError::Cancelled`] unless the response won the race.
    pub async fn execute(
        &self,
        command: impl Into<String>,
        arguments: Option<Value>,
        token: Option<&CancellationToken>,
    ) -> ClientResult<Response> {
        let Admission {
            generation,
            seq,
            mut response,
        } = self
            .request(|reply| ClientCommand::Execute {
                command: command.into(),
                arguments,
                reply,
            })
            .await??;

        let Some(token) = token else {
            return response.await.unwrap_or(Err(ClientError::Disposed));
        };

        tokio::select! {
            biased;
            result = &mut response => return result.unwrap_or(Err(ClientError::Disposed)),
            () = token.cancelled() => {}
        }

        tracing::debug!(seq, "Cancelling request");
        self.send(ClientCommand::Cancel { generation, seq }).await?;
        response.await.unwrap_or(Err(ClientError::Disposed))
    }

    /// Send `command` without waiting for, or expecting, a response.
    pub async fn notify(
        &self,
        command: impl Into<String>,
        arguments: Option<Value>,
    ) -> ClientResult<()> {
        self.send(ClientCommand::Notify {
            command: command.into(),
            arguments,
        })
        .await
    }

    pub async fn ensure_started(&self) -> ClientResult<()> {
        self.request(|reply| ClientCommand::EnsureStarted { reply })
            .await?
    }

    /// Kill the worker and start a fresh one.
    ///
    /// Pending requests fail with [`ClientError::Cancelled`]. This also
    /// recovers from [`ServiceState::FailedPermanently`].
    pub async fn restart_service(&self) -> ClientResult<()> {
        self.request(|reply| ClientCommand::Restart { reply }).await?
    }

    /// Replace the configuration. Restarts the worker if a launch setting changed.
    pub async fn reconfigure(&self, config: ServiceConfig) -> ClientResult<()> {
        self.request(|reply| ClientCommand::Reconfigure {
            config: Box::new(config),
            reply,
        })
        .await?
    }

    /// Forget cached diagnostics for a document the editor closed.
    pub async fn close_document(&self, resource: impl Into<String>) -> ClientResult<()> {
        self.send(ClientCommand::CloseDocument {
            resource: resource.into(),
        })
        .await
    }

    pub async fn diagnostics(&self) -> ClientResult<DiagnosticsSnapshot> {
        self.request(|reply| ClientCommand::Diagnostics { reply })
            .await
    }

    /// Path of the running worker's log file.
    pub async fn server_log_file(&self) -> ClientResult<PathBuf> {
        self.request(|reply| ClientCommand::ServerLogFile { reply })
            .await?
    }

    /// Map an editor resource URI to the name the worker uses for it.
    #[must_use]
    pub fn to_server_path(&self, resource: &str) -> Option<String> {
        PathMapper::new(self.api_version()).to_server_path(resource)
    }

    /// Map a worker file name back to an editor resource URI.
    #[must_use]
    pub fn to_resource(&self, file_name: &str) -> String {
        PathMapper::new(self.api_version()).to_resource(file_name)
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        self.status.borrow().state
    }

    /// Version of the current (or last) worker. `1.0.0` before the first start.
    #[must_use]
    pub fn api_version(&self) -> ServerVersion {
        self.status.borrow().version.clone()
    }

    #[must_use]
    pub fn events(&self) -> &EventChannels {
        &self.channels
    }

    /// Stop the worker and reject everything outstanding with
    /// [`ClientError::Disposed`]. Later calls on any handle fail the same way.
    pub async fn dispose(&self) {
        if self
            .request(|reply| ClientCommand::Dispose { reply })
            .await
            .is_err()
        {
            tracing::debug!("Client already disposed");
        }
    }

    async fn send(&self, command: ClientCommand) -> ClientResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::Disposed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ClientCommand,
    ) -> ClientResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| ClientError::Disposed)
    }
}

impl std::fmt::Debug for TsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status.borrow();
        f.debug_struct("TsClient")
            .field("state", &status.state)
            .field("version", &status.version)
            .finish_non_exhaustive()
    }
}

