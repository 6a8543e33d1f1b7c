use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::runtime::ScriptValue;
use crate::sandbox::OutputSinks;

/// Outcome of a step that runs script code: either the step's value or the
/// failure the script raised. Host faults travel separately as
/// [`crate::SandboxError`].
pub type Attempt<T> = std::result::Result<T, ScriptFailure>;

/// How a loaded script exposes its entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Plain callable `main`
    Sync,
    /// Coroutine function `main`
    Async,
    /// No callable `main`
    Absent,
}

/// One stack frame of a script failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub filename: String,
    pub lineno: u32,
    pub name: String,
    #[serde(default)]
    pub line: Option<String>,
    /// Set by the runtime for frames that belong to its own machinery
    #[serde(default)]
    pub internal: bool,
}

impl Frame {
    /// Frames whose source is not a real file, e.g. `<frozen importlib._bootstrap>`.
    pub fn is_synthetic(&self) -> bool {
        self.filename.starts_with('<') && self.filename.ends_with('>')
    }
}

/// An exception raised by script code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptFailure {
    /// Exception type name
    pub kind: String,
    /// Exception-only text as the runtime formats it, e.g.
    /// `ZeroDivisionError: division by zero\n`
    pub summary: String,
    #[serde(default)]
    pub frames: Vec<Frame>,
    /// Syntax failures are reported without a traceback
    #[serde(default)]
    pub syntax: bool,
}

impl ScriptFailure {
    pub fn new(kind: impl Into<String>, message: impl AsRef<str>) -> Self {
        let kind = kind.into();
        Self {
            summary: format!("{}: {}\n", kind, message.as_ref()),
            kind,
            frames: Vec::new(),
            syntax: false,
        }
    }

    pub fn with_frames(mut self, frames: Vec<Frame>) -> Self {
        self.frames = frames;
        self
    }
}

/// Identity of the host runtime, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    /// Backend name (e.g., "python")
    pub name: String,
    pub implementation: String,
    pub version: String,
    /// Full build string as reported by the interpreter
    pub build: String,
    pub platform: String,
}

/// Everything a runtime needs to load a script.
#[derive(Debug, Clone)]
pub struct LoadRequest<'a> {
    /// Script path inside `workdir`
    pub path: &'a Path,
    pub workdir: &'a Path,
    /// Extra environment for the execution
    pub env: &'a [(String, String)],
    /// Where the script's output goes
    pub sinks: OutputSinks,
}

/// Trait for language runtimes that can load and run a script.
///
/// The engine drives a loaded script through load, bind and dispatch; the
/// runtime only provides those primitives plus the static queries the
/// dependency resolver needs.
#[async_trait]
pub trait ScriptRuntime: Send + Sync {
    /// Returns the runtime name (e.g., "python")
    fn name(&self) -> &str;

    /// Describe the interpreter backing this runtime
    async fn describe(&self) -> Result<RuntimeInfo>;

    /// Module names imported by `source`, in source order.
    /// Returns `None` when the source does not parse.
    async fn find_imports(&self, source: &str) -> Result<Option<Vec<String>>>;

    /// The subset of `modules` importable from `workdir`.
    async fn resolvable(&self, modules: &[String], workdir: &Path) -> Result<Vec<String>>;

    /// Load the script without running it. Syntax errors come back as a
    /// failure flagged `syntax`.
    async fn load(&self, request: LoadRequest<'_>) -> Result<Attempt<Box<dyn LoadedUnit>>>;
}

/// A script that has been loaded but not necessarily run.
#[async_trait]
pub trait LoadedUnit: Send {
    /// Run top-level code and look up the entry point
    async fn bind(&mut self) -> Result<Attempt<EntryKind>>;

    /// Call the entry point found by [`LoadedUnit::bind`]
    async fn invoke(&mut self, entry: EntryKind) -> Result<Attempt<Option<ScriptValue>>>;

    /// Tear the unit down. Returns once all script output reached the sinks.
    async fn close(self: Box<Self>) -> Result<()>;
}
