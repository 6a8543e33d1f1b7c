use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{get_workdir, ScriptboxConfig};
use crate::deps::{CommandInstaller, DependencyResolver, Resolution};
use crate::error::Result;
use crate::runtime::{
    EntryKind, LoadRequest, LoadedUnit, PythonRuntime, ScriptFailure, ScriptRuntime,
};
use crate::sandbox::capture::{OutputSinks, StreamCapture, DEFAULT_WINDOW};
use crate::sandbox::lenient::LenientSerializer;
use crate::sandbox::request::RunRequest;
use crate::sandbox::result::{RunMode, RunOutcome, RunResult};
use crate::sandbox::traceback::FrameFilter;
use crate::sandbox::workspace::Workspace;

/// State one run owns exclusively.
struct EngineState {
    resolver: DependencyResolver,
    workspace: Workspace,
}

/// Resolves, runs and captures scripts, one at a time.
///
/// Runs are serialized: a second [`Engine::run`] waits until the first has
/// finished, since both would share the working directory.
pub struct Engine {
    runtime: Arc<dyn ScriptRuntime>,
    state: Mutex<EngineState>,
    env: Vec<(String, String)>,
    window: Duration,
    filter: FrameFilter,
    serializer: LenientSerializer,
}

impl Engine {
    pub fn new(
        runtime: Arc<dyn ScriptRuntime>,
        resolver: DependencyResolver,
        workspace: Workspace,
    ) -> Self {
        Self {
            runtime,
            state: Mutex::new(EngineState {
                resolver,
                workspace,
            }),
            env: Vec::new(),
            window: DEFAULT_WINDOW,
            filter: FrameFilter::default(),
            serializer: LenientSerializer::default(),
        }
    }

    /// Engine backed by the configured interpreter and installer.
    pub fn from_config(config: &ScriptboxConfig) -> Result<Self> {
        let runtime = Arc::new(PythonRuntime::new(&config.runtime)?);
        let installer = Arc::new(CommandInstaller::from_config(&config.resolver)?);
        let resolver =
            DependencyResolver::new(&config.resolver, config.telemetry.clone(), installer);
        let workspace = Workspace::new(get_workdir(config))?;

        let env = config
            .runtime
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self::new(runtime, resolver, workspace)
            .with_env(env)
            .with_window(Duration::from_millis(config.capture.coalesce_window_ms)))
    }

    /// Environment exported to every execution
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_filter(mut self, filter: FrameFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_serializer(mut self, serializer: LenientSerializer) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn runtime(&self) -> &dyn ScriptRuntime {
        self.runtime.as_ref()
    }

    pub fn serializer(&self) -> &LenientSerializer {
        &self.serializer
    }

    /// Write the request's files, install what they need and run the active
    /// one.
    ///
    /// Script failures are part of the returned [`RunResult`]. Errors are
    /// reserved for bad requests, failed installs and host faults.
    pub async fn run(&self, request: &RunRequest) -> Result<RunResult> {
        request.validate()?;
        let active = request.active()?;

        let mut state = self.state.lock().await;
        let EngineState {
            resolver,
            workspace,
        } = &mut *state;

        workspace.prepare(&request.files)?;

        let Resolution {
            dependencies,
            installed,
        } = resolver
            .resolve(
                self.runtime.as_ref(),
                &active.content,
                &request.sources(),
                workspace.root(),
            )
            .await?;
        debug!(
            dependencies = ?dependencies,
            newly_installed = ?installed,
            "Dependencies ready"
        );

        let mut env = self.env.clone();
        env.extend(resolver.runtime_env().iter().cloned());

        info!(script = %active.name, files = request.files.len(), "Running script");
        let result = self
            .execute(&workspace.path_of(&active.name), workspace.root(), &env)
            .await?;

        info!(
            script = %active.name,
            mode = result.mode().tag(),
            success = result.outcome().is_success(),
            events = result.stream().len(),
            elapsed_ms = result.elapsed().as_millis() as u64,
            "Script finished"
        );
        Ok(result)
    }

    async fn execute(
        &self,
        path: &Path,
        workdir: &Path,
        env: &[(String, String)],
    ) -> Result<RunResult> {
        let capture = StreamCapture::new(self.window);
        let start = capture.start();
        let mut mode = RunMode::Undetermined;

        let (outcome, elapsed) = self
            .drive(path, workdir, env, capture.sinks(), &mut mode, start)
            .await?;

        Ok(RunResult::assemble(capture.finish(), mode, outcome, elapsed))
    }

    /// Load, bind and dispatch, recording in `mode` how far the run got.
    /// The elapsed time stops when dispatch ends, before the unit is closed.
    async fn drive(
        &self,
        path: &Path,
        workdir: &Path,
        env: &[(String, String)],
        sinks: OutputSinks,
        mode: &mut RunMode,
        start: Instant,
    ) -> Result<(RunOutcome, Duration)> {
        let request = LoadRequest {
            path,
            workdir,
            env,
            sinks,
        };
        let mut unit = match self.runtime.load(request).await? {
            Ok(unit) => unit,
            Err(failure) => return Ok((self.failed(&failure), start.elapsed())),
        };

        let outcome = self.dispatch(unit.as_mut(), mode).await;
        let elapsed = start.elapsed();
        // Output is only complete once the unit is closed
        let closed = unit.close().await;
        let outcome = outcome?;
        closed?;
        Ok((outcome, elapsed))
    }

    async fn dispatch(&self, unit: &mut dyn LoadedUnit, mode: &mut RunMode) -> Result<RunOutcome> {
        let entry = match unit.bind().await? {
            Ok(entry) => entry,
            Err(failure) => return Ok(self.failed(&failure)),
        };

        match entry {
            EntryKind::Sync => *mode = RunMode::EntrySync,
            EntryKind::Async => *mode = RunMode::EntryAsync,
            EntryKind::Absent => {
                *mode = RunMode::NoEntryPoint;
                return Ok(RunOutcome::Success(None));
            }
        }
        debug!(entry = ?entry, "Invoking entry point");

        Ok(match unit.invoke(entry).await? {
            Ok(value) => RunOutcome::Success(value),
            Err(failure) => self.failed(&failure),
        })
    }

    fn failed(&self, failure: &ScriptFailure) -> RunOutcome {
        debug!(kind = %failure.kind, frames = failure.frames.len(), "Script raised");
        RunOutcome::Error(self.filter.format(failure))
    }
}
