use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;
use crate::sandbox::request::ScriptFile;

/// The directory scripts are written to and run from.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Use `root`, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Make the workspace hold exactly `files`: regular files left by a
    /// previous run are removed before the new ones are written. Names must
    /// already be validated.
    pub fn prepare(&self, files: &[ScriptFile]) -> Result<()> {
        self.clear()?;
        for file in files {
            fs::write(self.path_of(&file.name), &file.content)?;
        }
        debug!(root = %self.root.display(), files = files.len(), "Prepared workspace");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove stale file");
            }
        }
        Ok(())
    }
}
