//! Worker message types.
//!
//! Only the routing fields (`type`, `seq`, `request_seq`, `success`,
//! `event`) are typed. Arguments and bodies stay as uninterpreted
//! [`serde_json::Value`] blobs; the typed event bodies at the bottom of this
//! module are decoded by consumers, never by the dispatcher's routing step.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A command sent to the worker.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl Request {
    pub fn new(seq: u64, command: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            seq,
            kind: "request",
            command: command.into(),
            arguments,
        }
    }
}

/// The worker's answer to exactly one [`Request`], matched by `request_seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub seq: u64,
    pub request_seq: u64,
    pub success: bool,
    #[serde(default)]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// An unsolicited message pushed by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub seq: u64,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        EventKind::from_tag(&self.event)
    }
}

/// Everything the worker may write to its output stream.
///
/// Any other `type` is a protocol violation and fails to deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Response(Response),
    Event(Event),
}

impl Message {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Which diagnostics pass produced a diagnostics event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Syntax,
    Semantic,
    Suggestion,
}

/// Routing classification of an event tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Diagnostics(DiagnosticKind),
    ConfigFileDiagnostics,
    ProjectLanguageServiceState,
    BeginInstallTypes,
    EndInstallTypes,
    TypesInstallerInitializationFailed,
    /// Tags with no external channel (e.g. `typingsInstallerPid`).
    Unrouted,
}

impl EventKind {
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "syntaxDiag" => Self::Diagnostics(DiagnosticKind::Syntax),
            "semanticDiag" => Self::Diagnostics(DiagnosticKind::Semantic),
            "suggestionDiag" => Self::Diagnostics(DiagnosticKind::Suggestion),
            "configFileDiag" => Self::ConfigFileDiagnostics,
            "projectLanguageServiceState" => Self::ProjectLanguageServiceState,
            "beginInstallTypes" => Self::BeginInstallTypes,
            "endInstallTypes" => Self::EndInstallTypes,
            "typesInstallerInitializationFailed" => Self::TypesInstallerInitializationFailed,
            _ => Self::Unrouted,
        }
    }
}

/// 1-based line/offset position as reported by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticCategory {
    Error,
    Warning,
    Suggestion,
    Message,
}

impl DiagnosticCategory {
    /// Unknown categories are reported as warnings.
    #[must_use]
    pub fn from_worker(category: &str) -> Self {
        match category {
            "error" => Self::Error,
            "suggestion" => Self::Suggestion,
            "message" => Self::Message,
            _ => Self::Warning,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsDiagnostic {
    #[serde(default)]
    pub start: Option<Location>,
    #[serde(default)]
    pub end: Option<Location>,
    pub text: String,
    #[serde(default)]
    pub code: Option<u32>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub source: Option<String>,
}

impl TsDiagnostic {
    #[must_use]
    pub fn category(&self) -> DiagnosticCategory {
        DiagnosticCategory::from_worker(&self.category)
    }
}

/// Body of `syntaxDiag`, `semanticDiag` and `suggestionDiag`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiagnosticEventBody {
    pub file: String,
    pub diagnostics: Vec<TsDiagnostic>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFileDiagnosticBody {
    #[serde(default)]
    pub trigger_file: String,
    pub config_file: String,
    #[serde(default)]
    pub diagnostics: Vec<TsDiagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectLanguageServiceStateBody {
    #[serde(default)]
    pub project_name: Option<String>,
    pub language_service_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginInstallTypesBody {
    pub event_id: u64,
    #[serde(default)]
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndInstallTypesBody {
    pub event_id: u64,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypesInstallerInitializationFailedBody {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization_with_arguments() {
        let req = Request::new(3, "quickinfo", Some(serde_json::json!({"line": 1})));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["seq"], 3);
        assert_eq!(json["type"], "request");
        assert_eq!(json["command"], "quickinfo");
        assert_eq!(json["arguments"]["line"], 1);
    }

    #[test]
    fn request_serialization_without_arguments() {
        let req = Request::new(0, "exit", None);
        let json = serde_json::to_value(&req).unwrap();
        assert!(
            json.get("arguments").is_none(),
            "arguments must be omitted, not null"
        );
    }

    #[test]
    fn parse_response() {
        let text = r#"{"seq":0,"type":"response","command":"echo","request_seq":4,"success":true,"body":{"value":2}}"#;
        match Message::parse(text).unwrap() {
            Message::Response(response) => {
                assert_eq!(response.request_seq, 4);
                assert!(response.success);
                assert_eq!(response.body, Some(serde_json::json!({"value": 2})));
            }
            other @ Message::Event(_) => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn parse_failed_response_keeps_message() {
        let text = r#"{"type":"response","request_seq":1,"success":false,"message":"No content available."}"#;
        let Message::Response(response) = Message::parse(text).unwrap() else {
            panic!("expected response");
        };
        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("No content available."));
        assert!(response.body.is_none());
    }

    #[test]
    fn parse_event() {
        let text = r#"{"seq":0,"type":"event","event":"semanticDiag","body":{"file":"/a.ts","diagnostics":[]}}"#;
        let Message::Event(event) = Message::parse(text).unwrap() else {
            panic!("expected event");
        };
        assert_eq!(event.kind(), EventKind::Diagnostics(DiagnosticKind::Semantic));
    }

    #[test]
    fn parse_rejects_unknown_message_type() {
        let text = r#"{"seq":0,"type":"request","command":"reload"}"#;
        assert!(Message::parse(text).is_err());
    }

    #[test]
    fn parse_rejects_missing_discriminant() {
        assert!(Message::parse(r#"{"seq":0,"request_seq":0,"success":true}"#).is_err());
    }

    #[test]
    fn event_tags_route_to_kinds() {
        assert_eq!(
            EventKind::from_tag("syntaxDiag"),
            EventKind::Diagnostics(DiagnosticKind::Syntax)
        );
        assert_eq!(
            EventKind::from_tag("suggestionDiag"),
            EventKind::Diagnostics(DiagnosticKind::Suggestion)
        );
        assert_eq!(
            EventKind::from_tag("configFileDiag"),
            EventKind::ConfigFileDiagnostics
        );
        assert_eq!(
            EventKind::from_tag("typesInstallerInitializationFailed"),
            EventKind::TypesInstallerInitializationFailed
        );
        assert_eq!(
            EventKind::from_tag("typingsInstallerPid"),
            EventKind::Unrouted
        );
    }

    #[test]
    fn diagnostic_body_deserialization() {
        let body = serde_json::json!({
            "file": "/src/a.ts",
            "diagnostics": [{
                "start": { "line": 3, "offset": 5 },
                "end": { "line": 3, "offset": 9 },
                "text": "Cannot find name 'foo'.",
                "code": 2304,
                "category": "error"
            }]
        });
        let body: DiagnosticEventBody = serde_json::from_value(body).unwrap();
        assert_eq!(body.diagnostics.len(), 1);
        let diag = &body.diagnostics[0];
        assert_eq!(diag.start, Some(Location { line: 3, offset: 5 }));
        assert_eq!(diag.code, Some(2304));
        assert!(diag.category().is_error());
    }

    #[test]
    fn unknown_category_is_warning() {
        assert_eq!(
            DiagnosticCategory::from_worker("shiny"),
            DiagnosticCategory::Warning
        );
    }

    #[test]
    fn project_state_body_is_camel_case() {
        let body: ProjectLanguageServiceStateBody = serde_json::from_value(serde_json::json!({
            "projectName": "/repo/tsconfig.json",
            "languageServiceEnabled": false
        }))
        .unwrap();
        assert_eq!(body.project_name.as_deref(), Some("/repo/tsconfig.json"));
        assert!(!body.language_service_enabled);
    }
}
