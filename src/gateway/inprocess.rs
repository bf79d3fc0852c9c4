//! In-process mode: run the agent directly, no gateway and no session.

use std::path::Path;

use tracing::info;

use crate::agent::{load_system_prompt, AgentLoop, LlmClient, ProviderRouter, RunOptions};
use crate::config::Config;
use crate::tools::ToolRunner;
use crate::Result;

/// Answer `message` with providers and tools built from `config`.
pub async fn handle_message(config: &Config, message: &str) -> Result<String> {
    let workspace = &config.agent.workspace;
    let agent = AgentLoop::new(ProviderRouter::from_env(), ToolRunner::with_defaults(workspace));
    run_once(&agent, workspace, &config.agent.model, message).await
}

/// One stateless run: credential check, workspace prompt, agent loop.
pub async fn run_once<C: LlmClient>(
    agent: &AgentLoop<C>,
    workspace: &Path,
    model: &str,
    message: &str,
) -> Result<String> {
    agent.preflight(model)?;
    info!("Handling message in-process with model {}", model);

    let system_prompt = load_system_prompt(workspace);
    agent.run(message, RunOptions::new(&system_prompt, model)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::ScriptedClient;
    use crate::error::Error;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_uses_workspace_prompt() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("AGENTS.md"), "You are terse.").unwrap();
        let agent = AgentLoop::new(ScriptedClient::texts(&["ok"]), ToolRunner::with_defaults(tmp.path()));

        let reply = run_once(&agent, tmp.path(), "gpt-4o-mini", "hello").await;
        assert_eq!(tokio_test::assert_ok!(reply), "ok");

        let sent = &agent.client().requests()[0];
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].text(), "You are terse.");
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_any_call() {
        let tmp = TempDir::new().unwrap();
        let agent = AgentLoop::new(ProviderRouter::new(None, None), ToolRunner::new());

        let err = run_once(&agent, tmp.path(), "anthropic/claude-sonnet-4-20250514", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCredential { var: "ANTHROPIC_API_KEY", .. }));
    }
}
