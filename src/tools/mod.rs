//! Tools module - host capabilities the agent may invoke
//!
//! The catalog is fixed: `run_shell`, `read_file` and `write_file`. Every
//! completion call receives the whole catalog.

mod filesystem;
mod runner;
mod shell;

pub use filesystem::{ReadFileTool, WriteFileTool};
pub use runner::{ToolDefinition, ToolRunner};
pub use shell::ShellTool;

use async_trait::async_trait;
use serde_json::Value;
use crate::Result;

/// Tool trait - interface for all agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls
    fn name(&self) -> &str;

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    /// Execute the tool with given parameters
    async fn execute(&self, params: Value) -> Result<String>;

    /// Convert to tool definition for LLM
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Pull a required string argument out of a tool's parameter object.
pub(crate) fn required_str<'a>(params: &'a Value, tool: &str, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| crate::Error::Tool(format!("{tool} requires {key}")))
}

/// Tool with a canned outcome, for tests
#[cfg(test)]
pub struct DummyTool {
    pub name: String,
    pub result: std::result::Result<String, String>,
}

#[cfg(test)]
#[async_trait]
impl Tool for DummyTool {
    fn name(&self) -> &str { &self.name }
    fn description(&self) -> &str { "Dummy tool for testing" }
    fn parameters(&self) -> Value { serde_json::json!({"type": "object", "properties": {}}) }

    async fn execute(&self, _params: Value) -> Result<String> {
        self.result.clone().map_err(crate::Error::Tool)
    }
}
