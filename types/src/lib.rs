//! Core protocol types for tslink.
//!
//! This crate contains the worker wire data model and the negotiated
//! [`ServerVersion`] with no IO and no async. Everything here can be used from
//! any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod protocol;
mod version;

pub use protocol::{
    BeginInstallTypesBody, ConfigFileDiagnosticBody, DiagnosticCategory, DiagnosticEventBody,
    DiagnosticKind, EndInstallTypesBody, Event, EventKind, Location, Message,
    ProjectLanguageServiceStateBody, Request, Response, TsDiagnostic,
    TypesInstallerInitializationFailedBody,
};
pub use version::{ServerVersion, VersionError};
