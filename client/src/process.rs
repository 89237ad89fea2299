//! Worker discovery, argument construction and spawning.
//!
//! [`WorkerLauncher`] is the seam between the supervisor and the operating
//! system. [`NodeLauncher`] runs `tsserver.js` under Node.js; tests substitute
//! an in-memory worker.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use tslink_types::ServerVersion;

use crate::types::{LogLevel, ServiceConfig};

const SERVER_SCRIPT: &str = "tsserver.js";

/// A located worker script and the version it reports.
#[derive(Debug, Clone, PartialEq)]
pub struct Installation {
    pub server_path: PathBuf,
    pub version: ServerVersion,
}

impl Installation {
    /// Inspect a TypeScript `lib` directory.
    pub fn probe(lib_dir: &Path) -> Result<Self> {
        let server_path = lib_dir.join(SERVER_SCRIPT);
        if !server_path.is_file() {
            bail!("{} does not exist", server_path.display());
        }
        let version = read_version(&lib_dir.join("..").join("package.json"));
        Ok(Self {
            server_path,
            version,
        })
    }

    /// Find the worker: configured `tsdk` first, then the workspace's
    /// `node_modules/typescript/lib`.
    pub fn resolve(config: &ServiceConfig, workspace_root: &Path) -> Result<Self> {
        let mut candidates = Vec::new();
        if let Some(tsdk) = &config.tsdk {
            let tsdk = if tsdk.is_absolute() {
                tsdk.clone()
            } else {
                workspace_root.join(tsdk)
            };
            candidates.push(tsdk);
        }
        candidates.push(workspace_root.join("node_modules").join("typescript").join("lib"));

        for candidate in &candidates {
            match Self::probe(candidate) {
                Ok(installation) => {
                    tracing::info!(
                        path = %installation.server_path.display(),
                        version = %installation.version,
                        "Using TypeScript installation"
                    );
                    return Ok(installation);
                }
                Err(e) => tracing::debug!("Skipping TypeScript candidate: {e:#}"),
            }
        }

        let checked: Vec<String> = candidates.iter().map(|c| c.display().to_string()).collect();
        bail!("no TypeScript installation found (checked {})", checked.join(", "))
    }
}

/// Version from a `package.json`, or [`ServerVersion::DEFAULT`] if unreadable.
pub(crate) fn read_version(package_json: &Path) -> ServerVersion {
    let raw = match std::fs::read_to_string(package_json) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %package_json.display(), "Cannot read worker package metadata: {e}");
            return ServerVersion::DEFAULT;
        }
    };

    let version = serde_json::from_str::<serde_json::Value>(&raw)
        .ok()
        .and_then(|json| json.get("version").and_then(|v| v.as_str()).map(String::from));
    let Some(version) = version else {
        tracing::warn!(path = %package_json.display(), "Worker package metadata has no version");
        return ServerVersion::DEFAULT;
    };

    ServerVersion::parse(&version).unwrap_or_else(|e| {
        tracing::warn!("{e}; assuming {}", ServerVersion::DEFAULT);
        ServerVersion::DEFAULT
    })
}

/// Everything needed to spawn one worker instance.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub node_path: Option<PathBuf>,
    /// Arguments for Node.js itself, before the script.
    pub node_args: Vec<String>,
    pub server_path: PathBuf,
    pub server_args: Vec<String>,
    pub cwd: PathBuf,
    pub version: ServerVersion,
    /// Prefix for cancellation sentinel files; `<prefix><seq>` cancels `seq`.
    pub cancellation_pipe: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

impl LaunchPlan {
    pub fn build(config: &ServiceConfig, installation: Installation, workspace_root: &Path) -> Self {
        let version = installation.version;

        let cancellation_pipe = version.supports(&ServerVersion::V222).then(|| {
            std::env::temp_dir().join(format!("tscancellation-{}.sock", random_hex()))
        });

        let log_file = (version.supports(&ServerVersion::V222) && config.log != LogLevel::Off)
            .then(|| {
                config
                    .log_directory
                    .clone()
                    .unwrap_or_else(std::env::temp_dir)
                    .join(format!("tsserver-{}.log", random_hex()))
            });

        let npm_location = if version.supports(&ServerVersion::V234) {
            config
                .npm_location
                .clone()
                .or_else(|| which::which("npm").ok())
        } else {
            None
        };

        let server_args = server_args(
            config,
            &version,
            cancellation_pipe.as_deref(),
            log_file.as_deref(),
            npm_location.as_deref(),
        );

        let node_args = config
            .debug_port
            .map(|port| vec![format!("--inspect={port}")])
            .unwrap_or_default();

        Self {
            node_path: config.node_path.clone(),
            node_args,
            server_path: installation.server_path,
            server_args,
            cwd: workspace_root.to_path_buf(),
            version,
            cancellation_pipe,
            log_file,
        }
    }
}

fn random_hex() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Worker command line, gated on what `version` understands.
pub(crate) fn server_args(
    config: &ServiceConfig,
    version: &ServerVersion,
    cancellation_pipe: Option<&Path>,
    log_file: Option<&Path>,
    npm_location: Option<&Path>,
) -> Vec<String> {
    let mut args = Vec::new();

    if version.supports(&ServerVersion::V250) {
        args.push("--useInferredProjectPerProjectRoot".to_string());
    } else if version.supports(&ServerVersion::V206) {
        args.push("--useSingleInferredProject".to_string());
    }

    if version.supports(&ServerVersion::V206) && config.disable_automatic_type_acquisition {
        args.push("--disableAutomaticTypingAcquisition".to_string());
    }

    if version.supports(&ServerVersion::V222) {
        if let Some(pipe) = cancellation_pipe {
            args.push("--cancellationPipeName".to_string());
            args.push(format!("{}*", pipe.display()));
        }
        if config.log != LogLevel::Off
            && let Some(log_file) = log_file
        {
            args.push("--logVerbosity".to_string());
            args.push(config.log.as_str().to_string());
            args.push("--logFile".to_string());
            args.push(log_file.display().to_string());
        }
    }

    if version.supports(&ServerVersion::V230) && !config.plugin_names.is_empty() {
        args.push("--globalPlugins".to_string());
        args.push(config.plugin_names.join(","));
        if let Some(root) = &config.plugin_root {
            args.push("--pluginProbeLocations".to_string());
            args.push(root.display().to_string());
        }
    }

    if let Some(cache) = &config.typings_cache_location {
        args.push("--globalTypingsCacheLocation".to_string());
        args.push(cache.display().to_string());
    }

    if version.supports(&ServerVersion::V234)
        && let Some(npm) = npm_location
    {
        args.push("--npmLocation".to_string());
        args.push(npm.display().to_string());
    }

    args
}

pub type WorkerInput = Box<dyn AsyncWrite + Send + Unpin>;
pub type WorkerOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Lifetime control for a spawned worker.
pub trait WorkerHandle: Send {
    /// Wait for exit. `Ok(None)` means terminated by a signal.
    fn wait(&mut self) -> BoxFuture<'_, io::Result<Option<i32>>>;

    fn start_kill(&mut self) -> io::Result<()>;
}

/// Stdio and lifetime handle of a spawned worker.
pub struct WorkerProcess {
    pub stdin: WorkerInput,
    pub stdout: WorkerOutput,
    pub stderr: Option<WorkerOutput>,
    pub handle: Box<dyn WorkerHandle>,
}

/// Locates and starts worker processes.
pub trait WorkerLauncher: Send + Sync {
    fn installation(&self, config: &ServiceConfig, workspace_root: &Path) -> Result<Installation>;

    fn launch(&self, plan: &LaunchPlan) -> Result<WorkerProcess>;
}

/// Runs `tsserver.js` under Node.js.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeLauncher;

struct NodeProcess(Child);

impl WorkerHandle for NodeProcess {
    fn wait(&mut self) -> BoxFuture<'_, io::Result<Option<i32>>> {
        Box::pin(async move { self.0.wait().await.map(|status| status.code()) })
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.0.start_kill()
    }
}

impl WorkerLauncher for NodeLauncher {
    fn installation(&self, config: &ServiceConfig, workspace_root: &Path) -> Result<Installation> {
        Installation::resolve(config, workspace_root)
    }

    fn launch(&self, plan: &LaunchPlan) -> Result<WorkerProcess> {
        let node = match &plan.node_path {
            Some(path) => path.clone(),
            None => which::which("node").context("node not found in PATH")?,
        };

        if let Some(dir) = plan.log_file.as_deref().and_then(Path::parent) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
        }

        let mut cmd = Command::new(&node);
        cmd.args(&plan.node_args)
            .arg(&plan.server_path)
            .args(&plan.server_args)
            .current_dir(&plan.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            node = %node.display(),
            server = %plan.server_path.display(),
            args = ?plan.server_args,
            "Spawning worker"
        );

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", node.display()))?;

        let stdin = child.stdin.take().context("no stdin from worker")?;
        let stdout = child.stdout.take().context("no stdout from worker")?;
        let stderr = child.stderr.take();

        Ok(WorkerProcess {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: stderr.map(|s| Box::new(s) as WorkerOutput),
            handle: Box::new(NodeProcess(child)),
        })
    }
}
