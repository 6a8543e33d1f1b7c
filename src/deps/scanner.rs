use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::runtime::ScriptRuntime;

/// Import names whose distribution is published under a different name.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("PIL", "pillow"),
    ("bs4", "beautifulsoup4"),
    ("cv2", "opencv-python"),
    ("dateutil", "python-dateutil"),
    ("google.protobuf", "protobuf"),
    ("sklearn", "scikit-learn"),
    ("yaml", "pyyaml"),
];

/// Discovers the packages a script needs from its import statements.
#[derive(Debug, Clone)]
pub struct ImportScanner {
    aliases: BTreeMap<String, String>,
}

impl Default for ImportScanner {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

impl ImportScanner {
    /// Scanner using the built-in alias table with `overrides` layered on top.
    pub fn new(overrides: &BTreeMap<String, String>) -> Self {
        let mut aliases: BTreeMap<String, String> = BUILTIN_ALIASES
            .iter()
            .map(|(module, package)| (module.to_string(), package.to_string()))
            .collect();
        aliases.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { aliases }
    }

    /// Distribution name for an importable module.
    pub fn package_for<'a>(&'a self, module: &'a str) -> &'a str {
        self.aliases
            .get(module)
            .map(String::as_str)
            .unwrap_or(module)
    }

    /// Packages needed by `sources` that `runtime` cannot already import,
    /// in first-import order. Sources that fail to parse contribute nothing.
    pub async fn scan(
        &self,
        runtime: &dyn ScriptRuntime,
        sources: &[&str],
        workdir: &Path,
    ) -> Result<Vec<String>> {
        let mut modules: Vec<String> = Vec::new();
        for source in sources {
            let Some(imports) = runtime.find_imports(source).await? else {
                debug!("Skipping import scan of source with syntax errors");
                continue;
            };
            for import in imports {
                let module = self.installable_module(&import).to_string();
                if !modules.contains(&module) {
                    modules.push(module);
                }
            }
        }

        if modules.is_empty() {
            return Ok(Vec::new());
        }

        let present: HashSet<String> = runtime
            .resolvable(&modules, workdir)
            .await?
            .into_iter()
            .collect();
        debug!(?modules, ?present, "Checked imports against environment");

        let mut packages: Vec<String> = Vec::new();
        for module in modules.iter().filter(|m| !present.contains(*m)) {
            let package = self.package_for(module).to_string();
            if !packages.contains(&package) {
                packages.push(package);
            }
        }
        Ok(packages)
    }

    /// Submodule imports install their top-level package unless the dotted
    /// name itself has an alias.
    fn installable_module<'a>(&self, import: &'a str) -> &'a str {
        if self.aliases.contains_key(import) {
            return import;
        }
        import.split('.').next().unwrap_or(import)
    }
}
