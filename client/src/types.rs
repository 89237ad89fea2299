//! Public types consumed by embedders.
//!
//! These types define the interface between `tslink-client` and its callers.
//! The caller constructs a [`ServiceConfig`], subscribes to event channels
//! carrying the payloads below, and reads [`DiagnosticsSnapshot`]s.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tslink_types::{DiagnosticCategory, DiagnosticKind, TsDiagnostic};

/// Worker-side log verbosity (`--logVerbosity`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Off,
    Normal,
    Terse,
    Verbose,
}

impl LogLevel {
    /// Unknown values turn logging off.
    #[must_use]
    pub fn from_str_lossy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" => Self::Normal,
            "terse" => Self::Terse,
            "verbose" => Self::Verbose,
            _ => Self::Off,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Normal => "normal",
            Self::Terse => "terse",
            Self::Verbose => "verbose",
        }
    }
}

/// Client-side protocol tracing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    #[default]
    Off,
    Messages,
    Verbose,
}

impl TraceLevel {
    /// Unknown values turn tracing off.
    #[must_use]
    pub fn from_str_lossy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "messages" => Self::Messages,
            "verbose" => Self::Verbose,
            _ => Self::Off,
        }
    }
}

/// How requests are framed on the worker's stdin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestFraming {
    /// One JSON document per `\r\n`-terminated line.
    #[default]
    Line,
    /// `Content-Length` header framing, same as the worker's output.
    ContentLength,
}

/// Configuration for the worker and the client around it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// TypeScript `lib` directory containing `tsserver.js`.
    pub tsdk: Option<PathBuf>,
    /// Node.js executable. Resolved from PATH when unset.
    pub node_path: Option<PathBuf>,
    pub log: LogLevel,
    /// Directory for the worker log file. Defaults to the temp dir.
    pub log_directory: Option<PathBuf>,
    pub trace: TraceLevel,
    /// Inspector port forwarded as `--inspect=<port>`.
    pub debug_port: Option<u16>,
    pub npm_location: Option<PathBuf>,
    pub plugin_names: Vec<String>,
    pub plugin_root: Option<PathBuf>,
    pub typings_cache_location: Option<PathBuf>,
    pub disable_automatic_type_acquisition: bool,
    /// Sent in the `configure` request after every start. Empty disables it.
    pub host_info: Option<String>,
    pub compiler_options_for_inferred_projects: Option<Map<String, Value>>,
    pub request_framing: RequestFraming,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let mut inferred = Map::new();
        inferred.insert("allowJs".to_string(), Value::Bool(true));
        inferred.insert("allowSyntheticDefaultImports".to_string(), Value::Bool(true));
        inferred.insert("allowNonTsExtensions".to_string(), Value::Bool(true));

        Self {
            tsdk: None,
            node_path: None,
            log: LogLevel::Off,
            log_directory: None,
            trace: TraceLevel::Off,
            debug_port: None,
            npm_location: None,
            plugin_names: Vec::new(),
            plugin_root: None,
            typings_cache_location: None,
            disable_automatic_type_acquisition: false,
            host_info: Some(String::from("tslink")),
            compiler_options_for_inferred_projects: Some(inferred),
            request_framing: RequestFraming::Line,
        }
    }
}

impl ServiceConfig {
    /// Whether switching from `self` to `next` changes how the worker is launched.
    #[must_use]
    pub fn requires_restart(&self, next: &ServiceConfig) -> bool {
        self.tsdk != next.tsdk
            || self.node_path != next.node_path
            || self.log != next.log
            || self.log_directory != next.log_directory
            || self.debug_port != next.debug_port
            || self.npm_location != next.npm_location
            || self.plugin_names != next.plugin_names
            || self.plugin_root != next.plugin_root
            || self.typings_cache_location != next.typings_cache_location
            || self.disable_automatic_type_acquisition != next.disable_automatic_type_acquisition
            || self.request_framing != next.request_framing
    }

    pub(crate) fn host_info(&self) -> Option<&str> {
        self.host_info.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Lifecycle of the worker process as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Exited,
    Errored,
    /// The crash-loop policy or a spawn failure stopped automatic restarts.
    FailedPermanently,
}

/// Diagnostics pushed for one resource by one diagnostics pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsEvent {
    pub kind: DiagnosticKind,
    /// Resource URI or path, mapped back from the worker's file name.
    pub resource: String,
    pub diagnostics: Vec<TsDiagnostic>,
}

/// Immutable snapshot of all cached diagnostics, suitable for rendering.
///
/// Counts are computed from `files` so they can never disagree with it.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    /// Per-resource diagnostics, sorted with error-containing resources first.
    files: Vec<(String, Vec<TsDiagnostic>)>,
}

impl DiagnosticsSnapshot {
    pub(crate) fn new(files: Vec<(String, Vec<TsDiagnostic>)>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[(String, Vec<TsDiagnostic>)] {
        &self.files
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn count_by_category(&self, category: DiagnosticCategory) -> usize {
        self.files
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.category() == category)
            .count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count_by_category(DiagnosticCategory::Error)
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count_by_category(DiagnosticCategory::Warning)
    }

    #[must_use]
    pub fn suggestion_count(&self) -> usize {
        self.count_by_category(DiagnosticCategory::Suggestion)
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.files.iter().map(|(_, items)| items.len()).sum()
    }

    /// Format a compact status string like "E:3 W:5".
    #[must_use]
    pub fn status_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("E:{} W:{}", self.error_count(), self.warning_count())
    }
}
