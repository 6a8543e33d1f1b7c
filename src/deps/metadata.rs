//! Inline script metadata.
//!
//! A metadata block is a run of comment lines opened by `# /// TYPE` and
//! closed by `# ///`:
//!
//! ```text
//! # /// script
//! # dependencies = ["requests"]
//! # ///
//! ```
//!
//! Interior lines must be `#` alone or start with `# `. The comment prefix is
//! stripped and the result parsed as TOML.

use tracing::debug;

use crate::error::{Result, SandboxError};

/// Block type holding script metadata.
pub const SCRIPT_BLOCK: &str = "script";

const CLOSER: &str = "# ///";

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptMetadata {
    table: toml::Table,
}

impl ScriptMetadata {
    /// Read the `script` block of `source`, if it has one.
    pub fn read(source: &str) -> Result<Option<Self>> {
        let mut blocks = find_blocks(source)
            .into_iter()
            .filter(|block| block.kind == SCRIPT_BLOCK);

        let Some(block) = blocks.next() else {
            return Ok(None);
        };
        if blocks.next().is_some() {
            return Err(SandboxError::MultipleMetadataBlocks {
                block: SCRIPT_BLOCK.to_string(),
            });
        }

        let table = block
            .content
            .parse::<toml::Table>()
            .map_err(|e| SandboxError::MetadataParse(e.to_string()))?;
        Ok(Some(Self { table }))
    }

    /// Declared dependencies, `None` when the block has no `dependencies` key.
    pub fn dependencies(&self) -> Result<Option<Vec<String>>> {
        let Some(value) = self.table.get("dependencies") else {
            return Ok(None);
        };
        let items = value
            .as_array()
            .ok_or_else(|| SandboxError::MalformedDependencies {
                reason: "dependencies must be a list".to_string(),
            })?;

        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| SandboxError::MalformedDependencies {
                        reason: "dependencies must be a list of strings".to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.table.get(key)
    }
}

/// Dependencies declared in `source`'s metadata block, if any.
pub fn declared_dependencies(source: &str) -> Result<Option<Vec<String>>> {
    match ScriptMetadata::read(source)? {
        Some(metadata) => {
            let dependencies = metadata.dependencies()?;
            debug!(?dependencies, "Read script metadata");
            Ok(dependencies)
        }
        None => Ok(None),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Block {
    kind: String,
    content: String,
}

/// All well-formed metadata blocks, of any type, in source order.
fn find_blocks(source: &str) -> Vec<Block> {
    let lines: Vec<&str> = source.split('\n').collect();
    let mut blocks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let Some(kind) = opener_type(lines[i]) else {
            i += 1;
            continue;
        };

        // The block ends at the last closer of the comment run that follows
        let run_end = lines[i + 1..]
            .iter()
            .position(|line| !is_content_line(line))
            .map_or(lines.len(), |offset| i + 1 + offset);
        let closer = (i + 2..run_end).rev().find(|&j| lines[j] == CLOSER);

        match closer {
            Some(end) => {
                let content = lines[i + 1..end]
                    .iter()
                    .map(|line| {
                        let stripped = line
                            .strip_prefix("# ")
                            .or_else(|| line.strip_prefix('#'))
                            .unwrap_or(line);
                        format!("{}\n", stripped)
                    })
                    .collect();
                blocks.push(Block {
                    kind: kind.to_string(),
                    content,
                });
                i = end + 1;
            }
            None => i += 1,
        }
    }

    blocks
}

fn opener_type(line: &str) -> Option<&str> {
    let kind = line.strip_prefix("# /// ")?;
    let valid = !kind.is_empty()
        && kind
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    valid.then_some(kind)
}

fn is_content_line(line: &str) -> bool {
    line == "#" || line.starts_with("# ")
}
