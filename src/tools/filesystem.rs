//! Filesystem tools - read and write files inside the workspace

use std::path::{Component, Path, PathBuf};
use async_trait::async_trait;
use serde_json::{json, Value};
use crate::Result;
use crate::error::Error;
use super::{required_str, Tool};

/// Resolve `path` against `workspace`, refusing anything that lands outside it.
///
/// Resolution is lexical: `..` components are folded before the prefix check.
fn resolve_in_workspace(workspace: &Path, path: &str) -> Result<PathBuf> {
    let root = normalize(workspace);
    let resolved = normalize(&root.join(path));
    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(Error::Tool(format!("Path not allowed: {}", path)))
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Read file contents
pub struct ReadFileTool {
    workspace: PathBuf,
}

impl ReadFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str { "read_file" }

    fn description(&self) -> &str {
        "Read the contents of a file. Path is relative to the workspace or absolute inside it."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let path = required_str(&params, "read_file", "path")?;
        let resolved = resolve_in_workspace(&self.workspace, path)?;

        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| Error::Tool(format!("Failed to read {}: {}", path, e)))
    }
}

/// Write content to a file
pub struct WriteFileTool {
    workspace: PathBuf,
}

impl WriteFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str { "write_file" }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. Path is relative to the workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let path = required_str(&params, "write_file", "path")?;
        let content = required_str(&params, "write_file", "content")?;
        let resolved = resolve_in_workspace(&self.workspace, path)?;

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Tool(format!("Failed to create directory: {}", e)))?;
        }

        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| Error::Tool(format!("Failed to write {}: {}", path, e)))?;

        Ok(format!("Wrote {} bytes to {}", content.len(), path))
    }
}
