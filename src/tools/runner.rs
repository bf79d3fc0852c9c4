//! Tool runner - owns the catalog and dispatches calls by name

use std::path::Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use crate::Result;
use super::Tool;
use super::filesystem::{ReadFileTool, WriteFileTool};
use super::shell::ShellTool;

/// Tool definition for LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema object: `type`, `properties`, `required`
    pub parameters: Value,
}

/// Tool runner manages registered tools and executes them.
///
/// Registration order is the catalog order sent to the model.
pub struct ToolRunner {
    tools: Vec<Box<dyn Tool>>,
    definitions: Vec<ToolDefinition>,
}

impl ToolRunner {
    /// Create an empty tool runner
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            definitions: Vec::new(),
        }
    }

    /// Create a tool runner with the standard catalog rooted at `workspace`
    pub fn with_defaults(workspace: &Path) -> Self {
        let mut runner = Self::new();
        runner.register(ShellTool::new(workspace.to_path_buf()));
        runner.register(ReadFileTool::new(workspace.to_path_buf()));
        runner.register(WriteFileTool::new(workspace.to_path_buf()));
        runner
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let definition = tool.to_definition();
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(idx) => {
                self.tools[idx] = Box::new(tool);
                self.definitions[idx] = definition;
            }
            None => {
                self.tools.push(Box::new(tool));
                self.definitions.push(definition);
            }
        }
    }

    /// Tool definitions for the LLM, in registration order
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Execute a tool by name.
    ///
    /// An unregistered name is not an error: the model gets
    /// `Unknown tool: <name>` back as the result text.
    pub async fn execute(&self, name: &str, params: Value) -> Result<String> {
        match self.tools.iter().find(|t| t.name() == name) {
            Some(tool) => tool.execute(params).await,
            None => {
                debug!("Model requested unknown tool {}", name);
                Ok(format!("Unknown tool: {}", name))
            }
        }
    }

    /// List registered tool names
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::DummyTool;

    #[tokio::test]
    async fn test_tool_runner_register_and_execute() {
        let mut runner = ToolRunner::new();
        runner.register(DummyTool {
            name: "test_tool".to_string(),
            result: Ok("success".to_string()),
        });

        assert_eq!(runner.tool_names(), vec!["test_tool"]);

        let result = runner.execute("test_tool", serde_json::json!({})).await.unwrap();
        assert_eq!(result, "success");
    }

    #[tokio::test]
    async fn test_tool_runner_unknown_tool() {
        let runner = ToolRunner::new();
        let result = runner
            .execute("nonexistent_tool", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result, "Unknown tool: nonexistent_tool");
    }

    #[test]
    fn test_default_catalog_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let runner = ToolRunner::with_defaults(tmp.path());
        assert_eq!(runner.tool_names(), vec!["run_shell", "read_file", "write_file"]);

        let defs = runner.definitions();
        assert_eq!(defs[2].parameters["required"], serde_json::json!(["path", "content"]));
        assert!(defs.iter().all(|d| !d.description.is_empty()));
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut runner = ToolRunner::new();
        for result in ["first", "second"] {
            runner.register(DummyTool {
                name: "dup".to_string(),
                result: Ok(result.to_string()),
            });
        }
        assert_eq!(runner.tool_names(), vec!["dup"]);
        assert_eq!(runner.definitions().len(), 1);
    }
}
