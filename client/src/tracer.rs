//! Protocol tracing under the `tslink::trace` target.

use std::time::Instant;

use tslink_types::{Event, Request, Response};

use crate::types::TraceLevel;

pub(crate) struct Tracer {
    level: TraceLevel,
}

impl Tracer {
    pub fn new(level: TraceLevel) -> Self {
        Self { level }
    }

    fn verbose(&self) -> bool {
        self.level == TraceLevel::Verbose
    }

    pub fn trace_request(&self, request: &Request, expects_response: bool, queue_length: usize) {
        match self.level {
            TraceLevel::Off => {}
            TraceLevel::Messages => tracing::info!(
                target: "tslink::trace",
                seq = request.seq,
                command = %request.command,
                expects_response,
                queue_length,
                "Sending request"
            ),
            TraceLevel::Verbose => tracing::info!(
                target: "tslink::trace",
                seq = request.seq,
                command = %request.command,
                expects_response,
                queue_length,
                arguments = %render(request.arguments.as_ref()),
                "Sending request"
            ),
        }
    }

    pub fn trace_response(&self, response: &Response, issued_at: Instant) {
        if self.level == TraceLevel::Off {
            return;
        }
        let elapsed_ms = u64::try_from(issued_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        if self.verbose() {
            tracing::info!(
                target: "tslink::trace",
                request_seq = response.request_seq,
                command = %response.command,
                success = response.success,
                elapsed_ms,
                body = %render(response.body.as_ref()),
                "Response received"
            );
        } else {
            tracing::info!(
                target: "tslink::trace",
                request_seq = response.request_seq,
                command = %response.command,
                success = response.success,
                elapsed_ms,
                "Response received"
            );
        }
    }

    pub fn trace_event(&self, event: &Event) {
        if self.level == TraceLevel::Off {
            return;
        }
        if self.verbose() {
            tracing::info!(
                target: "tslink::trace",
                event = %event.event,
                body = %render(event.body.as_ref()),
                "Event received"
            );
        } else {
            tracing::info!(target: "tslink::trace", event = %event.event, "Event received");
        }
    }

    pub fn log(&self, message: &str) {
        if self.level != TraceLevel::Off {
            tracing::info!(target: "tslink::trace", "{message}");
        }
    }
}

fn render(value: Option<&serde_json::Value>) -> String {
    value.map_or_else(|| String::from("none"), ToString::to_string)
}
