use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::debug;

use crate::error::{Result, SandboxError};
use crate::runtime::{EntryKind, ScriptFailure, ScriptValue};
use crate::sandbox::{Channel, OutputSinks};

/// Protocol messages sent to the harness.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum HarnessRequest {
    Load,
    Bind,
    Invoke { entry: EntryKind },
}

/// Message from the harness: script output or the answer to a request.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum HarnessResponse {
    Output {
        channel: Channel,
        text: String,
    },
    Loaded,
    Bound {
        entry: EntryKind,
    },
    Returned {
        #[serde(default)]
        value: Option<ScriptValue>,
    },
    Raised {
        failure: ScriptFailure,
    },
    Error {
        message: String,
    },
}

/// Line-delimited JSON connection to a harness process.
///
/// Script output arrives on the same connection as responses and is
/// forwarded to the sinks in arrival order.
pub(crate) struct HarnessConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    sinks: OutputSinks,
}

impl HarnessConnection {
    pub(crate) fn new(stream: UnixStream, sinks: OutputSinks) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            sinks,
        }
    }

    /// Send a request and receive a response.
    /// Returns `None` if the harness hung up before answering.
    pub(crate) async fn send(&mut self, request: &HarnessRequest) -> Result<Option<HarnessResponse>> {
        let mut request_json = serde_json::to_string(request)?;
        request_json.push('\n');
        debug!(request = ?request, "Sending harness request");

        if let Err(e) = self.writer.write_all(request_json.as_bytes()).await {
            // The harness is gone; the caller decides what that means
            debug!(error = %e, "Harness connection closed while writing");
            return Ok(None);
        }
        self.writer
            .flush()
            .await
            .map_err(|e| SandboxError::RuntimeProtocol(format!("Flush failed: {}", e)))?;

        loop {
            match self.next_message().await? {
                None => return Ok(None),
                Some(HarnessResponse::Output { channel, text }) => {
                    self.sinks.get(channel).write(&text);
                }
                Some(response) => return Ok(Some(response)),
            }
        }
    }

    /// Forward output written after the last response until the harness
    /// closes its end.
    pub(crate) async fn drain(&mut self) -> Result<()> {
        while let Some(message) = self.next_message().await? {
            match message {
                HarnessResponse::Output { channel, text } => {
                    self.sinks.get(channel).write(&text);
                }
                other => debug!(message = ?other, "Ignoring unsolicited harness message"),
            }
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<HarnessResponse>> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| SandboxError::RuntimeProtocol(format!("Read failed: {}", e)))?;
        if read == 0 {
            return Ok(None);
        }

        let message = serde_json::from_str(&line).map_err(|e| {
            SandboxError::RuntimeProtocol(format!("Failed to parse response: {}", e))
        })?;
        Ok(Some(message))
    }

    pub(crate) async fn shutdown(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "Harness connection already closed");
        }
    }
}
