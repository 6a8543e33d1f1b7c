//! Transport-neutral request handling.
//!
//! Maps requests onto the [`Engine`] and every outcome onto a status code and
//! JSON body, the way an HTTP front end would answer.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::config::ScriptboxConfig;
use crate::error::{Result, SandboxError};
use crate::runtime::RuntimeInfo;
use crate::sandbox::{Engine, RunRequest};

/// Status and JSON body answering one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(error: &SandboxError) -> Self {
        let body = match error {
            SandboxError::InstallFailed { log } => json!({
                "kind": "install-error",
                "message": log,
            }),
            other => json!({ "detail": other.to_string() }),
        };
        Self {
            status: error.status(),
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// A request as it arrives from a worker transport.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BoundaryRequest {
    Files(RunRequest),
    Script {
        #[serde(rename = "fileName", default)]
        file_name: Option<String>,
        code: String,
    },
}

/// Environment identity for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub version: String,
    pub runtime: RuntimeInfo,
}

pub struct Boundary {
    engine: Engine,
    default_file_name: String,
    timeout: Option<Duration>,
}

impl Boundary {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            default_file_name: "main.py".to_string(),
            timeout: None,
        }
    }

    pub fn from_config(config: &ScriptboxConfig) -> Result<Self> {
        let boundary = Self::new(Engine::from_config(config)?)
            .with_default_file_name(&config.boundary.default_file_name);
        Ok(match config.boundary.timeout_seconds {
            Some(seconds) => boundary.with_timeout(Duration::from_secs(seconds)),
            None => boundary,
        })
    }

    pub fn with_default_file_name(mut self, name: &str) -> Self {
        self.default_file_name = name.to_string();
        self
    }

    /// Bound every run; an expired run is abandoned and its interpreter killed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run one script whose source is the raw request body.
    pub async fn run_script(&self, file_name: Option<&str>, body: &[u8]) -> Response {
        if body.is_empty() {
            return Response::error(&SandboxError::EmptySource);
        }
        let Ok(source) = std::str::from_utf8(body) else {
            return Response::error(&SandboxError::InvalidEncoding);
        };

        let name = file_name.unwrap_or(&self.default_file_name);
        self.run_files(&RunRequest::single(name, source)).await
    }

    pub async fn run_files(&self, request: &RunRequest) -> Response {
        match self.execute(request).await {
            Ok(body) => Response::ok(body),
            Err(e) => {
                if !e.is_client_error() {
                    warn!(error = %e, status = e.status(), "Run failed");
                }
                Response::error(&e)
            }
        }
    }

    pub async fn handle(&self, request: BoundaryRequest) -> Response {
        match request {
            BoundaryRequest::Files(request) => self.run_files(&request).await,
            BoundaryRequest::Script { file_name, code } => {
                self.run_script(file_name.as_deref(), code.as_bytes()).await
            }
        }
    }

    pub async fn environment(&self) -> Result<Environment> {
        Ok(Environment {
            version: env!("CARGO_PKG_VERSION").to_string(),
            runtime: self.engine.runtime().describe().await?,
        })
    }

    async fn execute(&self, request: &RunRequest) -> Result<Value> {
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.engine.run(request))
                .await
                .map_err(|_| SandboxError::Timeout {
                    seconds: limit.as_secs(),
                })??,
            None => self.engine.run(request).await?,
        };

        let report = result.to_report(self.engine.serializer())?;
        Ok(serde_json::to_value(report)?)
    }
}
