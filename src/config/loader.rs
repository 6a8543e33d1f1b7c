use std::path::{Path, PathBuf};

use crate::config::types::ScriptboxConfig;
use crate::error::{Result, SandboxError};

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = project_dirs() {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".scriptbox").join("config.toml")
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "scriptbox", "scriptbox")
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(config_path: Option<&Path>) -> Result<ScriptboxConfig> {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    if !path.exists() {
        // Explicitly requested files must exist
        if config_path.is_some() {
            return Err(SandboxError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        return Ok(ScriptboxConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<ScriptboxConfig> {
    let config: ScriptboxConfig =
        toml::from_str(content).map_err(|e| SandboxError::TomlParse(e.to_string()))?;

    if config.resolver.installer.is_empty() {
        return Err(SandboxError::Config(
            "resolver.installer must name a command".to_string(),
        ));
    }
    if config.boundary.default_file_name.is_empty() {
        return Err(SandboxError::Config(
            "boundary.default_file_name must not be empty".to_string(),
        ));
    }

    Ok(config)
}

/// Get the data directory holding the default working directory
pub fn get_data_dir() -> PathBuf {
    if let Some(proj_dirs) = project_dirs() {
        proj_dirs.data_dir().to_path_buf()
    } else {
        dirs_fallback().join(".local").join("share").join("scriptbox")
    }
}

/// Working directory scripts are written to
pub fn get_workdir(config: &ScriptboxConfig) -> PathBuf {
    config
        .runtime
        .workdir
        .clone()
        .unwrap_or_else(|| get_data_dir().join("workspace"))
}
