use serde::{Deserialize, Serialize};

use crate::error::{Result, SandboxError};

/// One named source file of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptFile {
    pub name: String,
    pub content: String,
    /// The file with the highest index is the one executed
    #[serde(default)]
    pub active_index: i64,
}

impl ScriptFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            active_index: 0,
        }
    }

    pub fn with_active_index(mut self, active_index: i64) -> Self {
        self.active_index = active_index;
        self
    }
}

/// Files to write into the working directory for one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub files: Vec<ScriptFile>,
}

impl RunRequest {
    pub fn new(files: Vec<ScriptFile>) -> Self {
        Self { files }
    }

    /// A request with a single file, which is therefore active.
    pub fn single(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(vec![ScriptFile::new(name, content)])
    }

    /// The file to execute: highest `active_index`, first one on ties.
    pub fn active(&self) -> Result<&ScriptFile> {
        let mut active: Option<&ScriptFile> = None;
        for file in &self.files {
            if active.map_or(true, |a| file.active_index > a.active_index) {
                active = Some(file);
            }
        }
        active.ok_or(SandboxError::NoActiveFile)
    }

    /// Reject names that are not plain file names, and duplicates.
    pub fn validate(&self) -> Result<()> {
        for (i, file) in self.files.iter().enumerate() {
            validate_file_name(&file.name)?;
            if self.files[..i].iter().any(|f| f.name == file.name) {
                return Err(SandboxError::InvalidFileName {
                    name: file.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn sources(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.content.as_str()).collect()
    }
}

pub fn validate_file_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(SandboxError::InvalidFileName {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_active_index_wins() {
        let request = RunRequest::new(vec![
            ScriptFile::new("a.py", "").with_active_index(1),
            ScriptFile::new("b.py", "").with_active_index(3),
            ScriptFile::new("c.py", "").with_active_index(3),
        ]);
        assert_eq!(request.active().unwrap().name, "b.py");
    }

    #[test]
    fn test_empty_request_has_no_active_file() {
        assert!(matches!(
            RunRequest::new(Vec::new()).active(),
            Err(SandboxError::NoActiveFile)
        ));
    }

    #[test]
    fn test_file_names() {
        assert!(validate_file_name("main.py").is_ok());
        assert!(validate_file_name(".hidden.py").is_ok());
        for bad in ["", ".", "..", "../x.py", "dir/x.py", "C:\\x.py"] {
            assert!(validate_file_name(bad).is_err(), "{bad:?} should be rejected");
        }

        let dup = RunRequest::new(vec![ScriptFile::new("a.py", ""), ScriptFile::new("a.py", "")]);
        assert!(matches!(dup.validate(), Err(SandboxError::InvalidFileName { .. })));
    }

    #[test]
    fn test_wire_form() {
        let request: RunRequest = serde_json::from_str(
            r#"{"files": [{"name": "main.py", "content": "print(1)", "activeIndex": 2}, {"name": "util.py", "content": ""}]}"#,
        )
        .unwrap();
        assert_eq!(request.files[0].active_index, 2);
        assert_eq!(request.files[1].active_index, 0);
        assert_eq!(request.active().unwrap().name, "main.py");
    }
}
