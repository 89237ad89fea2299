//! Client for a tsserver worker process.
//!
//! [`TsClient`] supervises one worker: it locates and launches it, frames its
//! output, keeps requests single-flight, routes events to typed channels,
//! and restarts the worker when it crashes unless it is crash-looping.

pub mod codec;
pub mod types;

mod channels;
mod client;
mod connection;
mod diagnostics;
mod dispatcher;
mod error;
mod paths;
mod process;
mod queue;
mod service;
mod supervisor;
mod tracer;

pub use channels::{EventChannel, EventChannels, Subscription};
pub use client::TsClient;
pub use codec::{FrameError, MessageFramer, encode_frame};
pub use error::{ClientError, ClientResult};
pub use paths::PathMapper;
pub use process::{
    Installation, LaunchPlan, NodeLauncher, WorkerHandle, WorkerInput, WorkerLauncher,
    WorkerOutput, WorkerProcess,
};
pub use types::{
    DiagnosticsEvent, DiagnosticsSnapshot, LogLevel, RequestFraming, ServiceConfig, ServiceState,
    TraceLevel,
};

pub use tslink_types::{
    BeginInstallTypesBody, ConfigFileDiagnosticBody, DiagnosticCategory, DiagnosticKind,
    EndInstallTypesBody, Location, ProjectLanguageServiceStateBody, Response, ServerVersion,
    TsDiagnostic, TypesInstallerInitializationFailedBody,
};
