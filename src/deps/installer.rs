use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ResolverConfig;
use crate::error::{Result, SandboxError};

/// Installs a batch of packages into the runtime's environment.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install every package in `packages` or fail as a whole. Installer
    /// output is appended to `log_path`.
    async fn install(&self, packages: &[String], log_path: &Path) -> Result<()>;
}

/// Runs an external installer command with the package names appended.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
}

impl CommandInstaller {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command.split_first().ok_or_else(|| {
            SandboxError::Config("resolver.installer must not be empty".to_string())
        })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        Self::new(&config.installer)
    }

    fn display(&self, packages: &[String]) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .chain(packages)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl PackageInstaller for CommandInstaller {
    async fn install(&self, packages: &[String], log_path: &Path) -> Result<()> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        let log_err = log.try_clone()?;

        info!(packages = ?packages, "Installing packages");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.args(packages);
        if let Some(dir) = log_path.parent() {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::from(log));
        cmd.stderr(Stdio::from(log_err));
        cmd.kill_on_drop(true);

        let status = cmd.status().await.map_err(|e| {
            SandboxError::Installer(format!("failed to start `{}`: {}", self.program, e))
        })?;

        debug!(status = %status, "Installer finished");

        if status.success() {
            Ok(())
        } else {
            Err(SandboxError::Installer(format!(
                "`{}` exited with {}",
                self.display(packages),
                status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandInstaller {
        CommandInstaller::new(&["sh".to_string(), "-c".to_string(), script.to_string(), "sh".to_string()])
            .unwrap()
    }

    #[test]
    fn test_empty_command_is_rejected() {
        assert!(matches!(
            CommandInstaller::new(&[]),
            Err(SandboxError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_output_goes_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("install.log");

        sh("echo installing \"$@\"; echo warning >&2")
            .install(&["numpy".to_string(), "rich".to_string()], &log)
            .await
            .unwrap();

        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.contains("installing numpy rich"));
        assert!(text.contains("warning"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("install.log");

        let err = sh("echo 'No matching distribution' >&2; exit 1")
            .install(&["nonexistent-pkg".to_string()], &log)
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::Installer(_)));
        assert!(err.to_string().contains("nonexistent-pkg"));
        assert!(std::fs::read_to_string(&log)
            .unwrap()
            .contains("No matching distribution"));
    }

    #[tokio::test]
    async fn test_missing_program_fails() {
        let dir = tempfile::tempdir().unwrap();
        let installer =
            CommandInstaller::new(&["scriptbox-no-such-installer".to_string()]).unwrap();
        let err = installer
            .install(&["x".to_string()], &dir.path().join("install.log"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }
}
