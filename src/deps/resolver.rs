use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{CompanionRule, ResolverConfig, TelemetryConfig};
use crate::deps::installer::PackageInstaller;
use crate::deps::metadata::declared_dependencies;
use crate::deps::scanner::ImportScanner;
use crate::deps::telemetry::TelemetryLatch;
use crate::error::{Result, SandboxError};
use crate::runtime::ScriptRuntime;

/// Where a [`DependencySet`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencySource {
    /// The active script's metadata block
    Declared,
    /// Import statements of the request's scripts
    Scanned,
}

/// Ordered, duplicate-free package names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySet {
    source: DependencySource,
    packages: Vec<String>,
}

impl DependencySet {
    pub fn declared(packages: Vec<String>) -> Self {
        Self::collect(DependencySource::Declared, packages)
    }

    pub fn scanned(packages: Vec<String>) -> Self {
        Self::collect(DependencySource::Scanned, packages)
    }

    fn collect(source: DependencySource, packages: Vec<String>) -> Self {
        let mut set = Self {
            source,
            packages: Vec::with_capacity(packages.len()),
        };
        for package in packages {
            set.insert(package);
        }
        set
    }

    /// Returns false when `package` was already present.
    pub fn insert(&mut self, package: String) -> bool {
        if self.contains(&package) {
            return false;
        }
        self.packages.push(package);
        true
    }

    pub fn contains(&self, package: &str) -> bool {
        self.packages.iter().any(|p| p == package)
    }

    pub fn source(&self) -> DependencySource {
        self.source
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Packages installed during this engine's lifetime. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledSet {
    packages: BTreeSet<String>,
}

impl InstalledSet {
    /// Start from packages known to be installed already.
    pub fn with_packages<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, package: &str) -> bool {
        self.packages.contains(package)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(String::as_str)
    }

    fn record(&mut self, packages: &[String]) {
        self.packages.extend(packages.iter().cloned());
    }
}

/// What one resolution did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Packages the scripts need, as reported to the caller
    pub dependencies: DependencySet,
    /// The batch handed to the installer, companions included; empty when
    /// nothing had to be installed
    pub installed: Vec<String>,
}

/// Decides which packages a request needs and installs the missing ones.
pub struct DependencyResolver {
    scanner: ImportScanner,
    installer: Arc<dyn PackageInstaller>,
    companions: Vec<CompanionRule>,
    telemetry: TelemetryConfig,
    log_file: String,
    installed: InstalledSet,
    latch: TelemetryLatch,
}

impl DependencyResolver {
    pub fn new(
        config: &ResolverConfig,
        telemetry: TelemetryConfig,
        installer: Arc<dyn PackageInstaller>,
    ) -> Self {
        Self {
            scanner: ImportScanner::new(&config.aliases),
            installer,
            companions: config.companions.clone(),
            telemetry,
            log_file: config.log_file.clone(),
            installed: InstalledSet::default(),
            latch: TelemetryLatch::default(),
        }
    }

    /// Replace the starting installed set.
    pub fn with_installed(mut self, installed: InstalledSet) -> Self {
        self.installed = installed;
        self
    }

    pub fn installed(&self) -> &InstalledSet {
        &self.installed
    }

    /// Telemetry overrides to export to executions, once configured.
    pub fn runtime_env(&self) -> &[(String, String)] {
        self.latch.env()
    }

    /// Resolve and install what `sources` need.
    ///
    /// Declared metadata in `active` wins outright; otherwise imports of all
    /// `sources` are scanned. Installer output is kept in a private log file
    /// outside `workdir` and only surfaces when the install fails.
    pub async fn resolve(
        &mut self,
        runtime: &dyn ScriptRuntime,
        active: &str,
        sources: &[&str],
        workdir: &Path,
    ) -> Result<Resolution> {
        let dependencies = match declared_dependencies(active)? {
            Some(declared) => DependencySet::declared(declared),
            None => DependencySet::scanned(self.scanner.scan(runtime, sources, workdir).await?),
        };

        let mut batch: Vec<String> = dependencies
            .iter()
            .filter(|p| !self.installed.contains(p))
            .map(str::to_string)
            .collect();

        if batch.is_empty() {
            debug!(
                dependencies = ?dependencies,
                installed = self.installed.len(),
                "Nothing to install"
            );
            return Ok(Resolution {
                dependencies,
                installed: Vec::new(),
            });
        }

        for companion in self.companions_for(runtime, &dependencies, workdir).await? {
            if !batch.contains(&companion) {
                batch.push(companion);
            }
        }

        self.install(&batch).await?;
        self.installed.record(&batch);

        if batch.contains(&self.telemetry.package) && self.latch.set(&self.telemetry) {
            info!(package = %self.telemetry.package, "Configured telemetry");
        }

        debug!(
            dependencies = ?dependencies,
            installed = ?self.installed,
            "Resolved dependencies"
        );
        Ok(Resolution {
            dependencies,
            installed: batch,
        })
    }

    /// Companion packages `dependencies` call for that are not present yet.
    async fn companions_for(
        &self,
        runtime: &dyn ScriptRuntime,
        dependencies: &DependencySet,
        workdir: &Path,
    ) -> Result<Vec<String>> {
        let mut wanted: Vec<String> = Vec::new();
        for rule in &self.companions {
            if dependencies.iter().any(|d| rule.matches(d))
                && !self.installed.contains(&rule.package)
                && !wanted.contains(&rule.package)
            {
                wanted.push(rule.package.clone());
            }
        }
        if wanted.is_empty() {
            return Ok(wanted);
        }

        let present = runtime.resolvable(&wanted, workdir).await?;
        wanted.retain(|p| !present.contains(p));
        Ok(wanted)
    }

    async fn install(&self, batch: &[String]) -> Result<()> {
        // User files may share the log's name, so it never lives in the workspace
        let log_dir = tempfile::Builder::new()
            .prefix("scriptbox-install-")
            .tempdir()?;
        let log_path = log_dir.path().join(&self.log_file);
        let outcome = self.installer.install(batch, &log_path).await;

        let log = match outcome {
            Ok(()) => String::new(),
            Err(_) => tokio::fs::read_to_string(&log_path)
                .await
                .unwrap_or_default(),
        };
        if let Err(e) = tokio::fs::remove_file(&log_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %log_path.display(), error = %e, "Failed to remove install log");
            }
        }

        outcome.map_err(|e| {
            warn!(packages = ?batch, error = %e, "Install failed");
            SandboxError::InstallFailed {
                log: format!("{}\n{}", log, e),
            }
        })
    }
}
