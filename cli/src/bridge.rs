//! Newline-delimited JSON bridge between stdin/stdout and a [`TsClient`].
//!
//! Each input line is one command:
//!
//! ```text
//! {"id": 1, "command": "quickinfo", "arguments": {...}}
//! {"command": "open", "arguments": {...}, "notify": true}
//! {"command": "tslink/cancel", "arguments": {"id": 1}}
//! ```
//!
//! Commands under the `tslink/` prefix are handled by the bridge itself;
//! everything else goes to the worker. Output lines are either replies
//! (`{"id", "success", "body" | "error"}`) or pushed events
//! (`{"event", "body"}`), in completion order.
//!
//! An `id` may be reused once its reply is written. Requests without an `id`
//! cannot be cancelled.

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tslink_client::{ClientError, ClientResult, Subscription, TsClient};

const CANCEL: &str = "tslink/cancel";
const RESTART: &str = "tslink/restart";
const DIAGNOSTICS: &str = "tslink/diagnostics";
const LOG_FILE: &str = "tslink/logFile";
const CLOSE_DOCUMENT: &str = "tslink/closeDocument";

#[derive(Debug, Deserialize)]
struct Line {
    #[serde(default)]
    id: Value,
    command: String,
    #[serde(default)]
    arguments: Option<Value>,
    #[serde(default)]
    notify: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum BridgeCommand {
    Execute {
        id: Value,
        command: String,
        arguments: Option<Value>,
    },
    Notify {
        command: String,
        arguments: Option<Value>,
    },
    Cancel {
        id: Value,
    },
    Restart {
        id: Value,
    },
    Diagnostics {
        id: Value,
    },
    LogFile {
        id: Value,
    },
    CloseDocument {
        resource: String,
    },
}

fn parse_line(text: &str) -> Result<BridgeCommand, String> {
    let line: Line = serde_json::from_str(text).map_err(|e| format!("invalid command: {e}"))?;
    let argument = |name: &str| line.arguments.as_ref().and_then(|args| args.get(name)).cloned();

    let command = match line.command.as_str() {
        CANCEL => BridgeCommand::Cancel {
            id: argument("id").unwrap_or(Value::Null),
        },
        RESTART => BridgeCommand::Restart { id: line.id },
        DIAGNOSTICS => BridgeCommand::Diagnostics { id: line.id },
        LOG_FILE => BridgeCommand::LogFile { id: line.id },
        CLOSE_DOCUMENT => {
            let Some(Value::String(resource)) = argument("resource") else {
                return Err(format!("{CLOSE_DOCUMENT} needs a string `resource` argument"));
            };
            BridgeCommand::CloseDocument { resource }
        }
        _ if line.notify => BridgeCommand::Notify {
            command: line.command,
            arguments: line.arguments,
        },
        _ => BridgeCommand::Execute {
            id: line.id,
            command: line.command,
            arguments: line.arguments,
        },
    };
    Ok(command)
}

fn reply<T: Serialize>(id: &Value, result: ClientResult<T>) -> Value {
    match result {
        Ok(body) => json!({ "id": id, "success": true, "body": body }),
        Err(e) => {
            let mut out = json!({
                "id": id,
                "success": false,
                "error": e.to_string(),
                "cancelled": e.is_cancelled(),
            });
            if let ClientError::RequestFailed {
                body: Some(body), ..
            } = e
            {
                out["body"] = body;
            }
            out
        }
    }
}

/// Cancellation tokens are keyed by the id's JSON text so any non-null id type works.
fn token_key(id: &Value) -> String {
    id.to_string()
}

/// Forward one event channel to the output as `{"event": name, "body": ...}`.
fn forward<T>(name: &'static str, mut subscription: Subscription<T>, out: mpsc::Sender<Value>)
where
    T: Clone + Serialize + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(body) = subscription.recv().await {
            if out.send(json!({ "event": name, "body": body })).await.is_err() {
                break;
            }
        }
    });
}

pub fn forward_events(client: &TsClient, out: &mpsc::Sender<Value>) {
    let events = client.events();
    forward("serverStarted", events.server_started.subscribe(), out.clone());
    forward("state", events.state.subscribe(), out.clone());
    forward("diagnostics", events.diagnostics.subscribe(), out.clone());
    forward("configFileDiag", events.config_diagnostics.subscribe(), out.clone());
    forward("projectLanguageServiceState", events.project_state.subscribe(), out.clone());
    forward("beginInstallTypes", events.begin_install_types.subscribe(), out.clone());
    forward("endInstallTypes", events.end_install_types.subscribe(), out.clone());
    forward(
        "typesInstallerInitializationFailed",
        events.installer_initialization_failed.subscribe(),
        out.clone(),
    );
    forward("resendModels", events.resend_models.subscribe(), out.clone());
}

/// Serve commands from `input` until it closes, then wait for in-flight work.
pub async fn run<R>(client: TsClient, input: R, out: mpsc::Sender<Value>) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut in_flight: FuturesUnordered<BoxFuture<'static, (Option<String>, Option<Value>)>> =
        FuturesUnordered::new();
    let mut tokens: HashMap<String, CancellationToken> = HashMap::new();
    let mut input_open = true;

    while input_open || !in_flight.is_empty() {
        tokio::select! {
            // New work is polled (and thereby queued) before the next line is read.
            biased;
            Some((key, output)) = in_flight.next() => {
                if let Some(key) = key {
                    tokens.remove(&key);
                }
                if let Some(output) = output
                    && out.send(output).await.is_err()
                {
                    break;
                }
            }
            line = lines.next_line(), if input_open => {
                let Some(line) = line? else {
                    input_open = false;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_line(&line) {
                    Ok(command) => {
                        if let Some(work) = start(&client, command, &mut tokens) {
                            in_flight.push(work);
                        }
                    }
                    Err(error) => {
                        tracing::warn!("Rejected bridge input: {error}");
                        let output = json!({ "success": false, "error": error });
                        if out.send(output).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn start(
    client: &TsClient,
    command: BridgeCommand,
    tokens: &mut HashMap<String, CancellationToken>,
) -> Option<BoxFuture<'static, (Option<String>, Option<Value>)>> {
    let client = client.clone();
    match command {
        BridgeCommand::Execute {
            id,
            command,
            arguments,
        } => {
            // Only requests with a unique id can be cancelled.
            let key = (!id.is_null()).then(|| token_key(&id));
            if let Some(key) = &key
                && tokens.contains_key(key)
            {
                let error = format!("request id {id} is already in flight");
                tracing::warn!("{error}");
                let output = json!({ "id": id, "success": false, "error": error, "cancelled": false });
                return Some(Box::pin(async move { (None, Some(output)) }));
            }
            let token = CancellationToken::new();
            if let Some(key) = &key {
                tokens.insert(key.clone(), token.clone());
            }
            Some(Box::pin(async move {
                let result = client.execute(command, arguments, Some(&token)).await;
                let body = result.map(|response| response.body.unwrap_or(Value::Null));
                (key, Some(reply(&id, body)))
            }))
        }
        BridgeCommand::Notify { command, arguments } => Some(Box::pin(async move {
            if let Err(e) = client.notify(command, arguments).await {
                tracing::warn!("Notification failed: {e}");
            }
            (None, None)
        })),
        BridgeCommand::Cancel { id } => {
            match tokens.get(&token_key(&id)) {
                Some(token) => token.cancel(),
                None => tracing::debug!(%id, "Nothing to cancel"),
            }
            None
        }
        BridgeCommand::Restart { id } => Some(Box::pin(async move {
            let result = client.restart_service().await;
            (None, Some(reply(&id, result)))
        })),
        BridgeCommand::Diagnostics { id } => Some(Box::pin(async move {
            let result = client.diagnostics().await.map(|snapshot| {
                let files: Vec<Value> = snapshot
                    .files()
                    .iter()
                    .map(|(resource, items)| json!({ "resource": resource, "diagnostics": items }))
                    .collect();
                json!({ "status": snapshot.status_string(), "files": files })
            });
            (None, Some(reply(&id, result)))
        })),
        BridgeCommand::LogFile { id } => Some(Box::pin(async move {
            let result = client.server_log_file().await;
            (None, Some(reply(&id, result)))
        })),
        BridgeCommand::CloseDocument { resource } => Some(Box::pin(async move {
            if let Err(e) = client.close_document(resource).await {
                tracing::warn!("Closing document failed: {e}");
            }
            (None, None)
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_worker_request() {
        let command =
            parse_line(r#"{"id": 3, "command": "quickinfo", "arguments": {"line": 1}}"#).unwrap();
        assert_eq!(
            command,
            BridgeCommand::Execute {
                id: json!(3),
                command: "quickinfo".to_string(),
                arguments: Some(json!({"line": 1})),
            }
        );
    }

    #[test]
    fn notify_flag_selects_notification() {
        let command = parse_line(r#"{"command": "open", "notify": true}"#).unwrap();
        assert_eq!(
            command,
            BridgeCommand::Notify {
                command: "open".to_string(),
                arguments: None,
            }
        );
    }

    #[test]
    fn parses_bridge_commands() {
        assert_eq!(
            parse_line(r#"{"command": "tslink/cancel", "arguments": {"id": "a"}}"#).unwrap(),
            BridgeCommand::Cancel { id: json!("a") }
        );
        assert_eq!(
            parse_line(r#"{"id": 1, "command": "tslink/restart"}"#).unwrap(),
            BridgeCommand::Restart { id: json!(1) }
        );
        assert_eq!(
            parse_line(
                r#"{"command": "tslink/closeDocument", "arguments": {"resource": "file:///a.ts"}}"#
            )
            .unwrap(),
            BridgeCommand::CloseDocument {
                resource: "file:///a.ts".to_string()
            }
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_line("not json").is_err());
        assert!(parse_line(r#"{"id": 1}"#).is_err());
        assert!(parse_line(r#"{"command": "tslink/closeDocument"}"#).is_err());
    }

    #[test]
    fn reply_shapes() {
        let ok = reply(&json!(1), Ok(json!({"value": 2})));
        assert_eq!(ok, json!({"id": 1, "success": true, "body": {"value": 2}}));

        let failed = reply::<Value>(
            &json!(2),
            Err(ClientError::RequestFailed {
                command: "definition".to_string(),
                message: "No content available.".to_string(),
                body: Some(json!({"reason": "none"})),
            }),
        );
        assert_eq!(failed["success"], json!(false));
        assert_eq!(failed["cancelled"], json!(false));
        assert_eq!(failed["body"], json!({"reason": "none"}));

        let cancelled = reply::<Value>(&json!(3), Err(ClientError::Cancelled { seq: 4 }));
        assert_eq!(cancelled["cancelled"], json!(true));
    }

    #[tokio::test]
    async fn duplicate_in_flight_id_is_rejected() {
        let client = TsClient::new(tslink_client::ServiceConfig::default(), "/nonexistent");
        let original = CancellationToken::new();
        let mut tokens = HashMap::from([(token_key(&json!(5)), original.clone())]);

        let work = start(
            &client,
            BridgeCommand::Execute {
                id: json!(5),
                command: "quickinfo".to_string(),
                arguments: None,
            },
            &mut tokens,
        )
        .unwrap();
        let (key, output) = work.await;

        assert_eq!(key, None, "the first request keeps its entry");
        let output = output.unwrap();
        assert_eq!(output["success"], json!(false));
        assert!(output["error"].as_str().unwrap().contains("already in flight"));
        assert_eq!(tokens.len(), 1);
        tokens[&token_key(&json!(5))].cancel();
        assert!(original.is_cancelled());
    }

    #[tokio::test]
    async fn requests_without_id_are_not_cancellable() {
        let client = TsClient::new(tslink_client::ServiceConfig::default(), "/nonexistent");
        let mut tokens = HashMap::new();

        for _ in 0..2 {
            let work = start(
                &client,
                BridgeCommand::Execute {
                    id: Value::Null,
                    command: "quickinfo".to_string(),
                    arguments: None,
                },
                &mut tokens,
            )
            .unwrap();
            assert!(tokens.is_empty());
            // No TypeScript installation under /nonexistent.
            let (key, output) = work.await;
            assert_eq!(key, None);
            assert_eq!(output.unwrap()["success"], json!(false));
        }
    }

    #[tokio::test]
    async fn malformed_input_is_reported_without_a_worker() {
        let client = TsClient::new(tslink_client::ServiceConfig::default(), "/nonexistent");
        let (out, mut rx) = mpsc::channel(8);
        run(client, &b"garbage\n\n"[..], out).await.unwrap();

        let output = rx.recv().await.unwrap();
        assert_eq!(output["success"], json!(false));
        assert!(rx.recv().await.is_none());
    }
}
