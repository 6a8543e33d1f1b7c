use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::{Result, SandboxError};
use crate::runtime::protocol::{HarnessConnection, HarnessRequest, HarnessResponse};
use crate::runtime::traits::{
    Attempt, EntryKind, LoadRequest, LoadedUnit, RuntimeInfo, ScriptFailure, ScriptRuntime,
};
use crate::runtime::ScriptValue;
use crate::sandbox::OutputSink;

/// Harness script run by the interpreter for every operation
const HARNESS: &str = include_str!("harness.py");

/// How long to wait for output to drain and the interpreter to exit
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// CPython backend.
///
/// Each execution runs in a fresh interpreter process whose cwd is the
/// working directory. Control messages and the script's `sys.stdout` and
/// `sys.stderr` writes share one private Unix socket, which keeps the two
/// channels in write order. The raw pipes still carry output written at the
/// file-descriptor level, such as that of child processes.
pub struct PythonRuntime {
    python: PathBuf,
    recursion_limit: Option<u32>,
    startup_timeout: Duration,
}

impl PythonRuntime {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let python =
            which::which(&config.python).map_err(|e| SandboxError::RuntimeNotAvailable {
                runtime: "python".to_string(),
                reason: format!("cannot find interpreter '{}': {}", config.python, e),
            })?;

        info!(python = %python.display(), "Using Python interpreter");

        Ok(Self {
            python,
            recursion_limit: config.recursion_limit,
            startup_timeout: Duration::from_secs(config.startup_timeout_seconds),
        })
    }

    /// Check if an interpreter by this name can be found.
    pub fn is_available(python: &str) -> bool {
        which::which(python).is_ok()
    }

    pub fn interpreter(&self) -> &Path {
        &self.python
    }

    fn command(&self, mode: &str) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.args(["-u", "-X", "utf8", "-c", HARNESS, mode]);
        cmd.env("PYTHONUNBUFFERED", "1");
        // No __pycache__ in the working directory
        cmd.env("PYTHONDONTWRITEBYTECODE", "1");
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run a one-shot harness mode, feeding `input` on stdin.
    async fn helper<T: for<'de> Deserialize<'de>>(
        &self,
        mode: &str,
        input: &str,
        cwd: Option<&Path>,
    ) -> Result<T> {
        let mut cmd = self.command(mode);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| SandboxError::RuntimeNotAvailable {
            runtime: "python".to_string(),
            reason: format!("failed to start {}: {}", self.python.display(), e),
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
            // Dropping stdin closes it so the harness sees EOF
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(SandboxError::RuntimeProtocol(format!(
                "harness mode '{}' failed ({}): {}",
                mode,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            SandboxError::RuntimeProtocol(format!("invalid '{}' output: {}", mode, e))
        })
    }
}

#[derive(Deserialize)]
struct ScanOutput {
    imports: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ResolvableOutput {
    resolvable: Vec<String>,
}

#[derive(Deserialize)]
struct DescribeOutput {
    implementation: String,
    version: String,
    build: String,
    platform: String,
}

#[async_trait]
impl ScriptRuntime for PythonRuntime {
    fn name(&self) -> &str {
        "python"
    }

    async fn describe(&self) -> Result<RuntimeInfo> {
        let output: DescribeOutput = self.helper("describe", "", None).await?;
        Ok(RuntimeInfo {
            name: self.name().to_string(),
            implementation: output.implementation,
            version: output.version,
            build: output.build,
            platform: output.platform,
        })
    }

    async fn find_imports(&self, source: &str) -> Result<Option<Vec<String>>> {
        let output: ScanOutput = self.helper("scan", source, None).await?;
        Ok(output.imports)
    }

    async fn resolvable(&self, modules: &[String], workdir: &Path) -> Result<Vec<String>> {
        if modules.is_empty() {
            return Ok(Vec::new());
        }
        let input = serde_json::to_string(modules)?;
        let output: ResolvableOutput = self.helper("resolvable", &input, Some(workdir)).await?;
        Ok(output.resolvable)
    }

    async fn load(&self, request: LoadRequest<'_>) -> Result<Attempt<Box<dyn LoadedUnit>>> {
        let file_name = request
            .path
            .file_name()
            .ok_or_else(|| SandboxError::InvalidFileName {
                name: request.path.display().to_string(),
            })?;

        // Socket paths are length-limited, so keep them out of the workdir
        let state_dir = tempfile::Builder::new().prefix("scriptbox-").tempdir()?;
        let socket_path = state_dir.path().join("harness.sock");
        let listener = UnixListener::bind(&socket_path)?;

        let mut cmd = self.command("run");
        cmd.arg(&socket_path);
        cmd.arg(file_name);
        cmd.current_dir(request.workdir);
        for (key, value) in request.env {
            cmd.env(key, value);
        }
        if let Some(limit) = self.recursion_limit {
            cmd.env("SCRIPTBOX_RECURSION_LIMIT", limit.to_string());
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| SandboxError::RuntimeNotAvailable {
            runtime: "python".to_string(),
            reason: format!("failed to start {}: {}", self.python.display(), e),
        })?;
        debug!(pid = ?child.id(), script = %request.path.display(), "Interpreter started");

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, request.sinks.primary.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, request.sinks.diagnostic.clone())));
        }

        let stream = tokio::select! {
            accepted = listener.accept() => accepted?.0,
            status = child.wait() => {
                return Err(SandboxError::RuntimeProtocol(format!(
                    "interpreter exited before connecting ({})",
                    status?
                )));
            }
            _ = tokio::time::sleep(self.startup_timeout) => {
                return Err(SandboxError::RuntimeProtocol(format!(
                    "interpreter did not connect within {} seconds",
                    self.startup_timeout.as_secs()
                )));
            }
        };

        let mut unit = PythonUnit {
            child,
            connection: HarnessConnection::new(stream, request.sinks.clone()),
            readers,
            _state_dir: state_dir,
        };

        match unit.request(HarnessRequest::Load).await? {
            Ok(HarnessResponse::Loaded) => Ok(Ok(Box::new(unit))),
            Ok(HarnessResponse::Raised { failure }) => {
                unit.shutdown().await;
                Ok(Err(failure))
            }
            Ok(other) => {
                unit.shutdown().await;
                Err(unexpected("load", other))
            }
            Err(failure) => {
                unit.shutdown().await;
                Ok(Err(failure))
            }
        }
    }
}

/// A script loaded into a live interpreter process.
struct PythonUnit {
    child: Child,
    connection: HarnessConnection,
    readers: Vec<JoinHandle<()>>,
    _state_dir: tempfile::TempDir,
}

impl PythonUnit {
    /// Send a request; an interpreter that died mid-request is the script's
    /// failure, not the host's.
    async fn request(&mut self, request: HarnessRequest) -> Result<Attempt<HarnessResponse>> {
        match self.connection.send(&request).await? {
            Some(HarnessResponse::Error { message }) => Err(SandboxError::RuntimeProtocol(message)),
            Some(response) => Ok(Ok(response)),
            None => {
                let status = self.child.wait().await?;
                warn!(status = %status, "Interpreter exited during a request");
                Ok(Err(ScriptFailure::new(
                    "RuntimeExit",
                    format!("runtime exited unexpectedly ({})", status),
                )))
            }
        }
    }

    async fn shutdown(&mut self) {
        self.connection.shutdown().await;

        match tokio::time::timeout(DRAIN_TIMEOUT, self.connection.drain()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to read trailing script output"),
            Err(_) => warn!("Harness connection still open after shutdown"),
        }

        match tokio::time::timeout(DRAIN_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => debug!(status = %status, "Interpreter exited"),
            Ok(Err(e)) => warn!(error = %e, "Failed to wait for interpreter"),
            Err(_) => {
                warn!("Interpreter did not exit after its connection closed, killing it");
                if let Err(e) = self.child.kill().await {
                    warn!(error = %e, "Failed to kill interpreter");
                }
            }
        }

        for reader in self.readers.drain(..) {
            // Grandchildren may keep the pipes open
            let abort = reader.abort_handle();
            if tokio::time::timeout(DRAIN_TIMEOUT, reader).await.is_err() {
                warn!("Output pipe still open after interpreter exit");
                abort.abort();
            }
        }
    }
}

#[async_trait]
impl LoadedUnit for PythonUnit {
    async fn bind(&mut self) -> Result<Attempt<EntryKind>> {
        Ok(match self.request(HarnessRequest::Bind).await? {
            Ok(HarnessResponse::Bound { entry }) => Ok(entry),
            Ok(HarnessResponse::Raised { failure }) => Err(failure),
            Ok(other) => return Err(unexpected("bind", other)),
            Err(failure) => Err(failure),
        })
    }

    async fn invoke(&mut self, entry: EntryKind) -> Result<Attempt<Option<ScriptValue>>> {
        Ok(match self.request(HarnessRequest::Invoke { entry }).await? {
            Ok(HarnessResponse::Returned { value }) => Ok(value),
            Ok(HarnessResponse::Raised { failure }) => Err(failure),
            Ok(other) => return Err(unexpected("invoke", other)),
            Err(failure) => Err(failure),
        })
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.shutdown().await;
        Ok(())
    }
}

fn unexpected(step: &str, response: HarnessResponse) -> SandboxError {
    SandboxError::RuntimeProtocol(format!(
        "unexpected response to {}: {:?}",
        step, response
    ))
}

/// Forward a pipe into a sink, decoding UTF-8 across read boundaries.
async fn pump<R: AsyncRead + Unpin>(mut pipe: R, sink: OutputSink) {
    let mut buf = [0u8; 8192];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(channel = ?sink.channel(), error = %e, "Failed to read script output");
                break;
            }
        };
        pending.extend_from_slice(&buf[..n]);

        let complete = complete_utf8_prefix(&pending);
        if complete > 0 {
            sink.write(&String::from_utf8_lossy(&pending[..complete]));
            pending.drain(..complete);
        }
    }

    if !pending.is_empty() {
        sink.write(&String::from_utf8_lossy(&pending));
    }
}

/// Length of the prefix of `bytes` that does not end inside a multi-byte
/// character. Invalid sequences count as complete and decode lossily.
fn complete_utf8_prefix(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Ok(_) => bytes.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => bytes.len(),
    }
}
