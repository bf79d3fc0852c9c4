//! Shell tool - run a command in the workspace

use std::path::PathBuf;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use crate::Result;
use crate::error::Error;
use super::{required_str, Tool};

/// Combined stdout cap, matching what the model can usefully read back
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Execute shell commands with `sh -c`
pub struct ShellTool {
    workspace: PathBuf,
}

impl ShellTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str { "run_shell" }

    fn description(&self) -> &str {
        "Run a shell command on the host. Use for listing files, running scripts, or any terminal task. Prefer simple, single commands."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to run (e.g. ls -la, pwd)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let command = required_str(&params, "run_shell", "command")?;

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .output()
            .await
            .map_err(|e| Error::Tool(format!("Failed to execute command: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                format!("command exited with code {}", output.status.code().unwrap_or(-1))
            } else {
                stderr.into_owned()
            };
            // Failed commands are a normal result for the model to read.
            return Ok(format!("Error: {}", detail));
        }

        let mut stdout = output.stdout;
        stdout.truncate(MAX_OUTPUT_BYTES);
        let stdout = String::from_utf8_lossy(&stdout);

        if stdout.is_empty() {
            Ok("(no output)".to_string())
        } else {
            Ok(stdout.into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_shell_echo() {
        let tmp = TempDir::new().unwrap();
        let shell = ShellTool::new(tmp.path().to_path_buf());

        let result = shell.execute(json!({
            "command": "echo 'Hello, World!'"
        })).await.unwrap();

        assert!(result.contains("Hello, World!"));
    }

    #[tokio::test]
    async fn test_shell_runs_in_workspace() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("marker.txt"), "").unwrap();
        let shell = ShellTool::new(tmp.path().to_path_buf());

        let result = shell.execute(json!({"command": "ls"})).await.unwrap();
        assert!(result.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_shell_failed_command_is_error_text() {
        let tmp = TempDir::new().unwrap();
        let shell = ShellTool::new(tmp.path().to_path_buf());

        let result = shell.execute(json!({"command": "echo oops >&2; exit 3"})).await.unwrap();
        assert!(result.starts_with("Error: "));
        assert!(result.contains("oops"));
    }

    #[tokio::test]
    async fn test_shell_no_output() {
        let tmp = TempDir::new().unwrap();
        let shell = ShellTool::new(tmp.path().to_path_buf());

        let result = shell.execute(json!({"command": "true"})).await.unwrap();
        assert_eq!(result, "(no output)");
    }

    #[tokio::test]
    async fn test_shell_missing_command() {
        let tmp = TempDir::new().unwrap();
        let shell = ShellTool::new(tmp.path().to_path_buf());

        let err = shell.execute(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("run_shell requires command"));
    }
}
