//! Scripted runtime used by unit tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, SandboxError};
use crate::runtime::{
    Attempt, EntryKind, LoadRequest, LoadedUnit, RuntimeInfo, ScriptFailure, ScriptRuntime,
    ScriptValue,
};
use crate::sandbox::{Channel, OutputSinks};

/// Behaviour of one script file under the fake runtime.
#[derive(Debug, Clone)]
pub(crate) struct FakeScript {
    pub load_failure: Option<ScriptFailure>,
    pub top_level_output: Vec<(Channel, String)>,
    pub bind_failure: Option<ScriptFailure>,
    pub entry: EntryKind,
    pub call_output: Vec<(Channel, String)>,
    pub call: Attempt<Option<ScriptValue>>,
    /// Time `close` takes, standing in for draining output
    pub close_delay: Duration,
}

impl FakeScript {
    pub fn no_entry() -> Self {
        Self {
            load_failure: None,
            top_level_output: Vec::new(),
            bind_failure: None,
            entry: EntryKind::Absent,
            call_output: Vec::new(),
            call: Ok(None),
            close_delay: Duration::ZERO,
        }
    }

    pub fn returning(entry: EntryKind, value: ScriptValue) -> Self {
        Self {
            entry,
            call: Ok(Some(value)),
            ..Self::no_entry()
        }
    }

    pub fn raising_in_call(entry: EntryKind, failure: ScriptFailure) -> Self {
        Self {
            entry,
            call: Err(failure),
            ..Self::no_entry()
        }
    }

    pub fn raising_on_load(failure: ScriptFailure) -> Self {
        Self {
            load_failure: Some(failure),
            ..Self::no_entry()
        }
    }

    pub fn raising_on_bind(failure: ScriptFailure) -> Self {
        Self {
            bind_failure: Some(failure),
            ..Self::no_entry()
        }
    }

    pub fn printing_at_top_level(mut self, channel: Channel, text: &str) -> Self {
        self.top_level_output.push((channel, text.to_string()));
        self
    }

    pub fn printing_in_call(mut self, channel: Channel, text: &str) -> Self {
        self.call_output.push((channel, text.to_string()));
        self
    }

    pub fn closing_after(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }
}

#[derive(Default)]
pub(crate) struct FakeRuntime {
    scripts: HashMap<String, FakeScript>,
    resolvable: HashSet<String>,
    /// Environment passed to each load, in order
    pub envs: Mutex<Vec<Vec<(String, String)>>>,
    /// Sources the scanner was asked about, in order
    pub scanned: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, file_name: &str, script: FakeScript) -> Self {
        self.scripts.insert(file_name.to_string(), script);
        self
    }

    pub fn with_resolvable(mut self, modules: &[&str]) -> Self {
        self.resolvable
            .extend(modules.iter().map(|m| m.to_string()));
        self
    }
}

#[async_trait]
impl ScriptRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn describe(&self) -> Result<RuntimeInfo> {
        Ok(RuntimeInfo {
            name: "fake".to_string(),
            implementation: "FakePython".to_string(),
            version: "3.12.0".to_string(),
            build: "3.12.0 (fake)".to_string(),
            platform: "test".to_string(),
        })
    }

    /// Understands `import a, b as c` and `from x import y` lines; a source
    /// containing `SYNTAX ERROR` does not parse.
    async fn find_imports(&self, source: &str) -> Result<Option<Vec<String>>> {
        self.scanned
            .lock()
            .unwrap()
            .push(source.to_string());
        if source.contains("SYNTAX ERROR") {
            return Ok(None);
        }

        let mut imports: Vec<String> = Vec::new();
        for line in source.lines().map(str::trim) {
            let names: Vec<String> = if let Some(rest) = line.strip_prefix("import ") {
                rest.split(',')
                    .filter_map(|part| part.split_whitespace().next())
                    .map(str::to_string)
                    .collect()
            } else if let Some(rest) = line.strip_prefix("from ") {
                match rest.split_whitespace().next() {
                    Some(module) if !module.starts_with('.') => vec![module.to_string()],
                    _ => Vec::new(),
                }
            } else {
                Vec::new()
            };
            for name in names {
                if !imports.contains(&name) {
                    imports.push(name);
                }
            }
        }
        Ok(Some(imports))
    }

    async fn resolvable(&self, modules: &[String], _workdir: &Path) -> Result<Vec<String>> {
        Ok(modules
            .iter()
            .filter(|m| self.resolvable.contains(*m))
            .cloned()
            .collect())
    }

    async fn load(&self, request: LoadRequest<'_>) -> Result<Attempt<Box<dyn LoadedUnit>>> {
        // The engine must have written the script before loading it
        std::fs::read_to_string(request.path)?;

        let file_name = request
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let script = self.scripts.get(&file_name).cloned().ok_or_else(|| {
            SandboxError::RuntimeProtocol(format!("no fake script named {}", file_name))
        })?;
        self.envs.lock().unwrap().push(request.env.to_vec());

        if let Some(failure) = script.load_failure.clone() {
            return Ok(Err(failure));
        }
        Ok(Ok(Box::new(FakeUnit {
            script,
            sinks: request.sinks,
        })))
    }
}

struct FakeUnit {
    script: FakeScript,
    sinks: OutputSinks,
}

impl FakeUnit {
    fn emit(&self, output: &[(Channel, String)]) {
        for (channel, text) in output {
            self.sinks.get(*channel).write(text);
        }
    }
}

#[async_trait]
impl LoadedUnit for FakeUnit {
    async fn bind(&mut self) -> Result<Attempt<EntryKind>> {
        self.emit(&self.script.top_level_output);
        Ok(match self.script.bind_failure.clone() {
            Some(failure) => Err(failure),
            None => Ok(self.script.entry),
        })
    }

    async fn invoke(&mut self, _entry: EntryKind) -> Result<Attempt<Option<ScriptValue>>> {
        self.emit(&self.script.call_output);
        Ok(self.script.call.clone())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        tokio::time::sleep(self.script.close_delay).await;
        Ok(())
    }
}
