//! Routes framed worker output to callbacks and event channels.

use serde::de::DeserializeOwned;
use serde_json::Value;

use tslink_types::{DiagnosticEventBody, Event, EventKind, Message, Response};

use crate::channels::EventChannels;
use crate::connection::Connection;
use crate::diagnostics::DiagnosticsStore;
use crate::error::ClientError;
use crate::paths::PathMapper;
use crate::tracer::Tracer;
use crate::types::DiagnosticsEvent;

/// Longest message excerpt quoted in a protocol error.
const PREVIEW_CHARS: usize = 200;

pub(crate) struct Dispatcher<'a> {
    pub channels: &'a EventChannels,
    pub diagnostics: &'a mut DiagnosticsStore,
    pub tracer: &'a Tracer,
}

impl Dispatcher<'_> {
    /// Route one message body. Anything but a response or an event is a
    /// protocol violation and is returned as an error.
    pub fn dispatch(&mut self, connection: &mut Connection, body: &str) -> Result<(), ClientError> {
        let message = Message::parse(body).map_err(|e| {
            ClientError::Protocol(format!("{e} in {:?}", preview(body)))
        })?;

        match message {
            Message::Response(response) => self.route_response(connection, response),
            Message::Event(event) => self.route_event(connection.mapper(), event),
        }
        Ok(())
    }

    fn route_response(&self, connection: &mut Connection, response: Response) {
        let seq = response.request_seq;
        let Some(callback) = connection.take_callback(seq) else {
            tracing::debug!(seq, "Dropping response with no pending callback");
            return;
        };
        self.tracer.trace_response(&response, callback.issued_at());

        let result = if callback.cancel_requested() {
            Err(ClientError::Cancelled { seq })
        } else if response.success {
            Ok(response)
        } else {
            Err(ClientError::RequestFailed {
                command: callback.command().to_string(),
                message: response.message.unwrap_or_default(),
                body: response.body,
            })
        };
        callback.resolve(result);
    }

    fn route_event(&mut self, mapper: &PathMapper, event: Event) {
        self.tracer.trace_event(&event);
        let Event {
            event: tag, body, ..
        } = event;

        match EventKind::from_tag(&tag) {
            EventKind::Diagnostics(kind) => {
                let Some(body) = decode::<DiagnosticEventBody>(&tag, body) else {
                    return;
                };
                let resource = mapper.to_resource(&body.file);
                self.diagnostics
                    .update(&resource, kind, body.diagnostics.clone());
                self.channels.diagnostics.send(DiagnosticsEvent {
                    kind,
                    resource,
                    diagnostics: body.diagnostics,
                });
            }
            EventKind::ConfigFileDiagnostics => {
                if let Some(body) = decode(&tag, body) {
                    self.channels.config_diagnostics.send(body);
                }
            }
            EventKind::ProjectLanguageServiceState => {
                if let Some(body) = decode(&tag, body) {
                    self.channels.project_state.send(body);
                }
            }
            EventKind::BeginInstallTypes => {
                if let Some(body) = decode(&tag, body) {
                    self.channels.begin_install_types.send(body);
                }
            }
            EventKind::EndInstallTypes => {
                if let Some(body) = decode(&tag, body) {
                    self.channels.end_install_types.send(body);
                }
            }
            EventKind::TypesInstallerInitializationFailed => {
                if let Some(body) = decode(&tag, body) {
                    self.channels.installer_initialization_failed.send(body);
                }
            }
            EventKind::Unrouted => {
                tracing::trace!(event = %tag, "Ignoring unrouted event");
            }
        }
    }
}

/// Decode a typed event body. Missing or malformed bodies are logged and dropped.
fn decode<T: DeserializeOwned>(tag: &str, body: Option<Value>) -> Option<T> {
    let Some(body) = body else {
        tracing::debug!(event = %tag, "Event without body");
        return None;
    };
    match serde_json::from_value(body) {
        Ok(body) => Some(body),
        Err(e) => {
            tracing::warn!(event = %tag, "Malformed event body: {e}");
            None
        }
    }
}

fn preview(body: &str) -> String {
    body.chars().take(PREVIEW_CHARS).collect()
}
