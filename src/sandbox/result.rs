use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::runtime::ScriptValue;
use crate::sandbox::capture::{Channel, OutputEvent};
use crate::sandbox::lenient::LenientSerializer;

/// How the script's entry point was (or was not) invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    #[serde(rename = "main")]
    EntrySync,
    #[serde(rename = "async-main")]
    EntryAsync,
    #[serde(rename = "no-main-function")]
    NoEntryPoint,
    /// Execution failed before the entry point was looked up
    #[serde(rename = "unknown")]
    Undetermined,
}

impl RunMode {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::EntrySync => "main",
            Self::EntryAsync => "async-main",
            Self::NoEntryPoint => "no-main-function",
            Self::Undetermined => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// `None` when there was no entry point to return anything
    Success(Option<ScriptValue>),
    /// Formatted, frame-filtered failure text
    Error(String),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Everything one execution produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    stream: Vec<OutputEvent>,
    mode: RunMode,
    outcome: RunOutcome,
    elapsed: Duration,
}

impl RunResult {
    pub fn assemble(
        stream: Vec<OutputEvent>,
        mode: RunMode,
        outcome: RunOutcome,
        elapsed: Duration,
    ) -> Self {
        Self {
            stream,
            mode,
            outcome,
            elapsed,
        }
    }

    pub fn stream(&self) -> &[OutputEvent] {
        &self.stream
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn outcome(&self) -> &RunOutcome {
        &self.outcome
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Text written to one channel, concatenated.
    pub fn output(&self, channel: Channel) -> String {
        self.stream
            .iter()
            .filter(|event| event.channel == channel)
            .map(|event| event.text.as_str())
            .collect()
    }

    /// Build the wire form, converting the return value leniently.
    /// Fails only when the return value cannot be represented.
    pub fn to_report(&self, serializer: &LenientSerializer) -> Result<RunReport> {
        let result = match &self.outcome {
            RunOutcome::Success(value) => ReportOutcome::Success {
                return_value: value
                    .as_ref()
                    .map(|v| serializer.to_value(v))
                    .transpose()?,
            },
            RunOutcome::Error(error) => ReportOutcome::Error {
                error: error.clone(),
            },
        };

        Ok(RunReport {
            stream: self
                .stream
                .iter()
                .map(|event| StreamChunk {
                    channel: event.channel,
                    text: event.text.clone(),
                    offset_seconds: event.offset.as_secs_f64(),
                })
                .collect(),
            mode: self.mode,
            result,
            run_time: self.elapsed.as_secs_f64(),
        })
    }

    pub fn to_json(&self, serializer: &LenientSerializer) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_report(serializer)?)?)
    }
}

/// Serialized form of a [`RunResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub stream: Vec<StreamChunk>,
    pub mode: RunMode,
    pub result: ReportOutcome,
    pub run_time: f64,
}

impl RunReport {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    pub channel: Channel,
    pub text: String,
    pub offset_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReportOutcome {
    Success {
        #[serde(
            rename = "returnValue",
            default,
            skip_serializing_if = "Option::is_none",
            deserialize_with = "present"
        )]
        return_value: Option<Value>,
    },
    Error {
        error: String,
    },
}

/// Keeps an explicit `null` distinct from a missing field.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}
