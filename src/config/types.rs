use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptboxConfig {
    pub runtime: RuntimeConfig,
    pub resolver: ResolverConfig,
    pub telemetry: TelemetryConfig,
    pub capture: CaptureConfig,
    pub boundary: BoundaryConfig,
}

/// Interpreter used to load and run scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interpreter command or path (resolved through PATH)
    pub python: String,
    /// Working directory scripts are written to (data dir when unset)
    pub workdir: Option<PathBuf>,
    /// Extra environment variables exported to every execution
    pub env: BTreeMap<String, String>,
    /// Recursion limit applied inside the interpreter
    pub recursion_limit: Option<u32>,
    /// How long to wait for the interpreter to connect back, in seconds
    pub startup_timeout_seconds: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            workdir: None,
            env: BTreeMap::new(),
            recursion_limit: Some(400),
            startup_timeout_seconds: 30,
        }
    }
}

/// Dependency discovery and installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Installer command; package names are appended
    pub installer: Vec<String>,
    /// Extra module -> distribution mappings, layered over the built-in table
    pub aliases: BTreeMap<String, String>,
    /// Companion packages added to install batches
    pub companions: Vec<CompanionRule>,
    /// File name of the transient installer log
    pub log_file: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            installer: vec![
                "python3".to_string(),
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
                "--disable-pip-version-check".to_string(),
            ],
            aliases: BTreeMap::new(),
            companions: CompanionRule::defaults(),
            log_file: "install.log".to_string(),
        }
    }
}

/// Adds `package` to an install batch when any dependency starts with one
/// of `triggers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionRule {
    pub triggers: Vec<String>,
    pub package: String,
}

impl CompanionRule {
    pub fn new(triggers: &[&str], package: &str) -> Self {
        Self {
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
            package: package.to_string(),
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            // rich output needs pygments to render
            Self::new(&["logfire", "rich"], "pygments"),
            Self::new(&["fastapi", "httpx", "pydantic_ai"], "ssl"),
        ]
    }

    pub fn matches(&self, dependency: &str) -> bool {
        self.triggers.iter().any(|t| dependency.starts_with(t.as_str()))
    }
}

/// Telemetry library configured once after it is first installed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Package whose installation triggers configuration
    pub package: String,
    /// Base URL the library should export to
    pub endpoint: Option<String>,
    /// Write token; without one the library is told not to send to its SaaS
    pub token: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            package: "logfire".to_string(),
            endpoint: None,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Same-channel writes closer together than this merge into one event
    pub coalesce_window_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryConfig {
    /// File name used when a request does not name its script
    pub default_file_name: String,
    /// Upper bound on a whole run in seconds (unbounded when unset)
    pub timeout_seconds: Option<u64>,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            default_file_name: "main.py".to_string(),
            timeout_seconds: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ScriptboxConfig = toml::from_str(
            r#"
            [runtime]
            python = "/usr/bin/python3.12"

            [resolver.aliases]
            mylib = "my-lib"
            "#,
        )
        .unwrap();

        assert_eq!(config.runtime.python, "/usr/bin/python3.12");
        assert_eq!(config.runtime.startup_timeout_seconds, 30);
        assert_eq!(config.resolver.aliases["mylib"], "my-lib");
        assert_eq!(config.resolver.companions, CompanionRule::defaults());
        assert_eq!(config.capture.coalesce_window_ms, 10);
        assert_eq!(config.boundary.default_file_name, "main.py");
        assert_eq!(config.telemetry.package, "logfire");
    }

    #[test]
    fn test_companion_rule_prefix_match() {
        let rule = CompanionRule::new(&["fastapi", "httpx"], "ssl");
        assert!(rule.matches("httpx"));
        assert!(rule.matches("fastapi-users"));
        assert!(!rule.matches("requests"));
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&ScriptboxConfig::default()).unwrap();
        let parsed: ScriptboxConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.resolver.installer, ResolverConfig::default().installer);
    }
}
