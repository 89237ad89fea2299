//! Environment variable overrides.

use tslink_client::{LogLevel, ServiceConfig, TraceLevel};

const LOG_VAR: &str = "TSS_LOG";
const TRACE_VAR: &str = "TSS_TRACE";
const DEBUG_VAR: &str = "TSS_DEBUG";

/// Settings taken from `TSS_LOG`, `TSS_TRACE` and `TSS_DEBUG`.
///
/// Unrecognized log and trace values mean `off`. `TSS_DEBUG` is ignored
/// unless it is a port number.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvOverrides {
    pub log: Option<LogLevel>,
    pub trace: Option<TraceLevel>,
    pub debug_port: Option<u16>,
}

impl EnvOverrides {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let debug_port = lookup(DEBUG_VAR).and_then(|value| match value.trim().parse() {
            Ok(port) => Some(port),
            Err(_) => {
                tracing::debug!("Ignoring non-numeric {DEBUG_VAR}={value:?}");
                None
            }
        });

        Self {
            log: lookup(LOG_VAR).map(|value| LogLevel::from_str_lossy(&value)),
            trace: lookup(TRACE_VAR).map(|value| TraceLevel::from_str_lossy(&value)),
            debug_port,
        }
    }

    pub fn apply(&self, config: &mut ServiceConfig) {
        if let Some(log) = self.log {
            config.log = log;
        }
        if let Some(trace) = self.trace {
            config.trace = trace;
        }
        if let Some(port) = self.debug_port {
            config.debug_port = Some(port);
        }
    }
}
