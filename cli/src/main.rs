//! tslink CLI - runs one supervised tsserver and bridges it to stdio.
//!
//! ```text
//! stdin (JSON lines) -> bridge::run -> TsClient -> tsserver
//! stdout (JSON lines) <- writer task <- replies + forwarded events
//! ```
//!
//! Stdout carries only protocol output, so logs go to
//! `~/.tslink/logs/tslink.log` (filtered by `RUST_LOG`).

mod bridge;

use std::{
    env,
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::Mutex,
};

use anyhow::Result;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tslink_client::TsClient;
use tslink_config::{EnvOverrides, TslinkConfig};

const OUTPUT_CHANNEL_CAPACITY: usize = 256;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Without a log file, drop logs rather than interleave them with protocol output.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(config_path) = TslinkConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("tslink.log"));
    }

    candidates.push(PathBuf::from(".tslink").join("logs").join("tslink.log"));
    candidates
}

/// Workspace root: the config's `[app] workspace`, then the first argument,
/// then the current directory.
fn workspace_root(config: &TslinkConfig) -> Result<PathBuf> {
    if let Some(workspace) = config.workspace() {
        return Ok(workspace.to_path_buf());
    }
    if let Some(arg) = env::args_os().nth(1) {
        return Ok(PathBuf::from(arg));
    }
    Ok(env::current_dir()?)
}

/// Write each output value as one line on stdout.
async fn write_output(mut rx: mpsc::Receiver<Value>) {
    let mut stdout = tokio::io::stdout();
    while let Some(value) = rx.recv().await {
        let mut line = value.to_string();
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            tracing::warn!("Stdout closed: {e}");
            break;
        }
        if let Err(e) = stdout.flush().await {
            tracing::warn!("Stdout flush failed: {e}");
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = match TslinkConfig::load() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            tracing::warn!("Using default configuration: {e}");
            TslinkConfig::default()
        }
    };
    let root = workspace_root(&config)?;
    let service_config = config.service_config(&EnvOverrides::from_env());
    tracing::info!(root = %root.display(), "Starting tslink");

    let client = TsClient::new(service_config, root);
    let (out, out_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
    let writer = tokio::spawn(write_output(out_rx));
    bridge::forward_events(&client, &out);

    let input = BufReader::new(tokio::io::stdin());
    let result = tokio::select! {
        result = bridge::run(client.clone(), input, out) => result,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::warn!("Failed to listen for Ctrl-C: {e}");
            }
            tracing::info!("Interrupted");
            Ok(())
        }
    };

    client.dispose().await;
    drop(client);
    // Event forwarders hold output senders until their channels close.
    if let Err(e) = writer.await {
        tracing::warn!("Output writer failed: {e}");
    }
    result
}
