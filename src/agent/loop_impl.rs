//! Agent loop - bounded turn loop over the LLM and the tools

use tracing::{debug, info, warn};
use crate::Result;
use crate::error::Error;
use crate::tools::ToolRunner;
use super::context::build_messages;
use super::llm::LlmClient;
use super::message::{Message, ToolCall};

/// Upper bound on completion calls per run
pub const TURN_LIMIT: usize = 10;

/// Final answer when the model returns neither text nor tool calls
pub const EMPTY_REPLY_FALLBACK: &str = "Done.";

/// Final answer when the turn limit is exhausted
pub const MAX_TURNS_FALLBACK: &str = "Max turns reached.";

/// Receives the final answer of a run. Called at most once per run.
pub type ChunkSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Inputs of a single run besides the user message.
#[derive(Clone, Copy)]
pub struct RunOptions<'a> {
    /// Prior conversation; system messages in it are ignored
    pub history: &'a [Message],
    pub system_prompt: &'a str,
    /// Model string, optionally prefixed with a provider (`anthropic/...`)
    pub model: &'a str,
    pub on_chunk: Option<ChunkSink<'a>>,
}

impl<'a> RunOptions<'a> {
    pub fn new(system_prompt: &'a str, model: &'a str) -> Self {
        Self {
            history: &[],
            system_prompt,
            model,
            on_chunk: None,
        }
    }

    pub fn with_history(mut self, history: &'a [Message]) -> Self {
        self.history = history;
        self
    }

    pub fn with_on_chunk(mut self, on_chunk: ChunkSink<'a>) -> Self {
        self.on_chunk = Some(on_chunk);
        self
    }

    fn emit(&self, text: &str) {
        if let Some(on_chunk) = self.on_chunk {
            on_chunk(text);
        }
    }
}

/// The agent loop processes messages through LLM and tool execution.
///
/// Holds no conversation state: every [`AgentLoop::run`] is independent
/// given its inputs.
pub struct AgentLoop<C: LlmClient> {
    client: C,
    tools: ToolRunner,
}

impl<C: LlmClient> AgentLoop<C> {
    /// Create a new agent loop
    pub fn new(client: C, tools: ToolRunner) -> Self {
        Self { client, tools }
    }

    #[cfg(test)]
    pub(crate) fn client(&self) -> &C {
        &self.client
    }

    /// Check the model's credential without calling the provider.
    pub fn preflight(&self, model: &str) -> Result<()> {
        self.client.preflight(model)
    }

    /// Run the loop for one user message and return the final answer.
    ///
    /// Provider and configuration errors end the run; tool failures do not.
    pub async fn run(&self, user_message: &str, options: RunOptions<'_>) -> Result<String> {
        let mut messages = build_messages(options.system_prompt, options.history, user_message);
        let tools = self.tools.definitions();

        info!(
            "Starting agent loop ({} history messages, model {})",
            options.history.len(),
            options.model
        );

        for turn in 0..TURN_LIMIT {
            debug!("Turn {}/{}", turn + 1, TURN_LIMIT);

            let completion = self.client.complete(&messages, tools, options.model).await?;

            if !completion.has_tool_calls() {
                if let Some(text) = completion.content.as_deref().filter(|t| !t.is_empty()) {
                    info!("Agent completed after {} turns: {} chars", turn + 1, text.len());
                    options.emit(text);
                    return Ok(text.to_string());
                }
            }

            messages.push(Message::assistant_with_tools(
                completion.content.clone(),
                completion.tool_calls.clone(),
            ));

            if !completion.has_tool_calls() {
                warn!("Model returned neither text nor tool calls");
                options.emit(EMPTY_REPLY_FALLBACK);
                return Ok(EMPTY_REPLY_FALLBACK.to_string());
            }

            // Sequential on purpose: later calls may rely on earlier side effects.
            for tool_call in &completion.tool_calls {
                let result = self.execute_tool(tool_call).await;
                messages.push(Message::tool_result(&tool_call.id, result));
            }
        }

        warn!("Agent loop hit the turn limit ({})", TURN_LIMIT);
        options.emit(MAX_TURNS_FALLBACK);
        Ok(MAX_TURNS_FALLBACK.to_string())
    }

    async fn execute_tool(&self, tool_call: &ToolCall) -> String {
        let name = tool_call.name();
        debug!("Executing tool: {} with args: {}", name, tool_call.function.arguments);

        let outcome = match tool_call.parse_arguments() {
            Ok(args) => self.tools.execute(name, args).await,
            Err(e) => Err(Error::Tool(format!("invalid arguments for {}: {}", name, e))),
        };

        match outcome {
            Ok(result) => {
                debug!("Tool {} succeeded: {} chars", name, result.len());
                result
            }
            Err(e) => {
                let detail = match e {
                    Error::Tool(msg) => msg,
                    other => other.to_string(),
                };
                debug!("Tool {} failed: {}", name, detail);
                format!("Error: {}", detail)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::{Completion, ScriptedClient};
    use crate::agent::message::Role;
    use crate::tools::DummyTool;
    use serde_json::json;
    use std::sync::Mutex;

    fn tool_call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall::new(id, name, args.to_string())
    }

    fn runner_with(name: &str, result: std::result::Result<&str, &str>) -> ToolRunner {
        let mut runner = ToolRunner::new();
        runner.register(DummyTool {
            name: name.to_string(),
            result: result.map(str::to_string).map_err(str::to_string),
        });
        runner
    }

    #[tokio::test]
    async fn test_text_reply_ends_after_one_turn() {
        let agent = AgentLoop::new(ScriptedClient::texts(&["Hello, human!"]), ToolRunner::new());

        let chunks = Mutex::new(Vec::new());
        let sink = |c: &str| chunks.lock().unwrap().push(c.to_string());
        let reply = agent
            .run("Hi there", RunOptions::new("sys", "m").with_on_chunk(&sink))
            .await
            .unwrap();

        assert_eq!(reply, "Hello, human!");
        assert_eq!(agent.client().calls(), 1);
        assert_eq!(*chunks.lock().unwrap(), vec!["Hello, human!".to_string()]);
    }

    #[tokio::test]
    async fn test_list_files_example() {
        let client = ScriptedClient::new(vec![
            Completion::tool_calls(vec![tool_call("call_1", "run_shell", json!({"command": "ls"}))]),
            Completion::text("Here are the files."),
        ]);
        let agent = AgentLoop::new(client, runner_with("run_shell", Ok("a.txt\nb.txt")));

        let reply = agent.run("list files", RunOptions::new("sys", "m")).await.unwrap();
        assert_eq!(reply, "Here are the files.");

        let second = &agent.client().requests()[1];
        assert_eq!(second.len(), 4);
        assert_eq!(second[2].role, Role::Assistant);
        assert_eq!(second[2].content, None);
        assert_eq!(second[3], Message::tool_result("call_1", "a.txt\nb.txt"));
    }

    #[tokio::test]
    async fn test_endless_tool_calls_hit_turn_limit() {
        let client = ScriptedClient::repeating(Completion::tool_calls(vec![tool_call(
            "call_x",
            "run_shell",
            json!({"command": "true"}),
        )]));
        let agent = AgentLoop::new(client, runner_with("run_shell", Ok("(no output)")));

        let chunks = Mutex::new(Vec::new());
        let sink = |c: &str| chunks.lock().unwrap().push(c.to_string());
        let reply = agent
            .run("loop forever", RunOptions::new("sys", "m").with_on_chunk(&sink))
            .await
            .unwrap();

        assert_eq!(reply, MAX_TURNS_FALLBACK);
        assert_eq!(agent.client().calls(), TURN_LIMIT);
        assert_eq!(*chunks.lock().unwrap(), vec![MAX_TURNS_FALLBACK.to_string()]);
    }

    #[tokio::test]
    async fn test_failing_tool_becomes_error_result() {
        let client = ScriptedClient::new(vec![
            Completion::tool_calls(vec![tool_call("call_1", "run_shell", json!({"command": "x"}))]),
            Completion::text("Recovered."),
        ]);
        let agent = AgentLoop::new(client, runner_with("run_shell", Err("disk on fire")));

        let reply = agent.run("try it", RunOptions::new("sys", "m")).await.unwrap();
        assert_eq!(reply, "Recovered.");

        let tool_msg = agent.client().requests()[1].last().cloned().unwrap();
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.text(), "Error: disk on fire");
    }

    #[tokio::test]
    async fn test_unparseable_arguments_do_not_abort() {
        let client = ScriptedClient::new(vec![
            Completion::tool_calls(vec![ToolCall::new("call_1", "run_shell", "{oops")]),
            Completion::text("ok"),
        ]);
        let agent = AgentLoop::new(client, runner_with("run_shell", Ok("unused")));

        assert_eq!(agent.run("go", RunOptions::new("sys", "m")).await.unwrap(), "ok");
        let tool_msg = agent.client().requests()[1].last().cloned().unwrap();
        assert!(tool_msg.text().starts_with("Error: invalid arguments for run_shell"));
    }

    #[tokio::test]
    async fn test_unknown_tool_result() {
        let client = ScriptedClient::new(vec![
            Completion::tool_calls(vec![tool_call("call_1", "nonexistent_tool", json!({}))]),
            Completion::text("ok"),
        ]);
        let agent = AgentLoop::new(client, ToolRunner::new());

        agent.run("go", RunOptions::new("sys", "m")).await.unwrap();
        let tool_msg = agent.client().requests()[1].last().cloned().unwrap();
        assert_eq!(tool_msg.text(), "Unknown tool: nonexistent_tool");
    }

    #[tokio::test]
    async fn test_tool_calls_run_in_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let client = ScriptedClient::new(vec![
            Completion::tool_calls(vec![
                tool_call("w", "write_file", json!({"path": "out.txt", "content": "first"})),
                tool_call("r", "read_file", json!({"path": "out.txt"})),
            ]),
            Completion::text("Wrote and read."),
        ]);
        let agent = AgentLoop::new(client, ToolRunner::with_defaults(tmp.path()));

        agent.run("write then read", RunOptions::new("sys", "m")).await.unwrap();

        let second = &agent.client().requests()[1];
        assert_eq!(second[3].tool_call_id.as_deref(), Some("w"));
        assert_eq!(second[4], Message::tool_result("r", "first"));
    }

    #[tokio::test]
    async fn test_empty_reply_falls_back_to_done() {
        let agent = AgentLoop::new(ScriptedClient::new(vec![Completion::default()]), ToolRunner::new());

        let chunks = Mutex::new(Vec::new());
        let sink = |c: &str| chunks.lock().unwrap().push(c.to_string());
        let reply = agent
            .run("hm", RunOptions::new("sys", "m").with_on_chunk(&sink))
            .await
            .unwrap();

        assert_eq!(reply, EMPTY_REPLY_FALLBACK);
        assert_eq!(chunks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_and_system_prompt_layout() {
        let agent = AgentLoop::new(ScriptedClient::texts(&["sure"]), ToolRunner::new());
        let history = vec![Message::system("stale"), Message::user("a"), Message::assistant("b")];

        agent
            .run("c", RunOptions::new("fresh", "m").with_history(&history))
            .await
            .unwrap();

        let sent = &agent.client().requests()[0];
        let roles: Vec<Role> = sent.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(sent[0].text(), "fresh");
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let agent = AgentLoop::new(
            ScriptedClient::failing(Error::Provider("503".into())),
            ToolRunner::new(),
        );
        let err = agent.run("hi", RunOptions::new("sys", "m")).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }
}
