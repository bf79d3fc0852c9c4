//! Anthropic messages client.
//!
//! This API differs structurally from the canonical list:
//! - system text travels in a top-level `system` field;
//! - tool results are `tool_result` blocks inside a user turn;
//! - assistant tool calls are `tool_use` blocks with structured `input`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::message::{Message, Role, ToolCall};
use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

use super::{fresh_call_id, Completion, LlmClient, Usage};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnthropicRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: AnthropicRole,
    pub content: AnthropicContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Canonical messages to the `(system, messages)` pair of a request.
pub fn to_anthropic_messages(messages: &[Message]) -> (String, Vec<AnthropicMessage>) {
    let mut system = Vec::new();
    let mut out: Vec<AnthropicMessage> = Vec::with_capacity(messages.len());

    for m in messages {
        match m.role {
            Role::System => system.push(m.text()),
            Role::User => out.push(AnthropicMessage {
                role: AnthropicRole::User,
                content: AnthropicContent::Text(m.text().to_string()),
            }),
            Role::Assistant => {
                let mut blocks = Vec::with_capacity(m.tool_calls.len() + 1);
                if let Some(text) = m.content.as_deref().filter(|t| !t.is_empty()) {
                    blocks.push(ContentBlock::Text { text: text.to_string() });
                }
                for tc in &m.tool_calls {
                    blocks.push(ContentBlock::ToolUse {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        input: structured_input(tc),
                    });
                }
                if !blocks.is_empty() {
                    out.push(AnthropicMessage {
                        role: AnthropicRole::Assistant,
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
            }
            Role::Tool => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: m.tool_call_id.clone().unwrap_or_default(),
                    content: m.text().to_string(),
                };
                // Results for one assistant turn share a single user turn.
                match out.last_mut() {
                    Some(AnthropicMessage {
                        role: AnthropicRole::User,
                        content: AnthropicContent::Blocks(blocks),
                    }) if blocks.iter().all(|b| matches!(b, ContentBlock::ToolResult { .. })) => {
                        blocks.push(block)
                    }
                    _ => out.push(AnthropicMessage {
                        role: AnthropicRole::User,
                        content: AnthropicContent::Blocks(vec![block]),
                    }),
                }
            }
        }
    }

    (system.join("\n\n"), out)
}

fn structured_input(tc: &ToolCall) -> Value {
    tc.parse_arguments().unwrap_or_else(|e| {
        warn!("Tool call {} has unparseable arguments: {}", tc.id, e);
        Value::Object(Default::default())
    })
}

fn encode_input(input: &Value) -> String {
    if input.is_null() {
        "{}".to_string()
    } else {
        input.to_string()
    }
}

/// A request's `(system, messages)` pair back to canonical messages.
pub fn from_anthropic_messages(system: &str, messages: &[AnthropicMessage]) -> Vec<Message> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system.is_empty() {
        out.push(Message::system(system));
    }

    for m in messages {
        match (&m.role, &m.content) {
            (AnthropicRole::User, AnthropicContent::Text(text)) => out.push(Message::user(text.as_str())),
            (AnthropicRole::Assistant, AnthropicContent::Text(text)) => {
                out.push(Message::assistant(text.as_str()))
            }
            (AnthropicRole::User, AnthropicContent::Blocks(blocks)) => {
                for block in blocks {
                    match block {
                        ContentBlock::ToolResult { tool_use_id, content } => {
                            out.push(Message::tool_result(tool_use_id.as_str(), content.as_str()))
                        }
                        ContentBlock::Text { text } => out.push(Message::user(text.as_str())),
                        ContentBlock::ToolUse { .. } => {
                            warn!("Ignoring tool_use block in a user turn")
                        }
                    }
                }
            }
            (AnthropicRole::Assistant, AnthropicContent::Blocks(blocks)) => {
                let mut text = String::new();
                let mut tool_calls = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text: t } => text.push_str(t),
                        ContentBlock::ToolUse { id, name, input } => {
                            tool_calls.push(ToolCall::new(id.as_str(), name.as_str(), encode_input(input)))
                        }
                        ContentBlock::ToolResult { .. } => {
                            warn!("Ignoring tool_result block in an assistant turn")
                        }
                    }
                }
                let content = (!text.is_empty()).then_some(text);
                out.push(Message::assistant_with_tools(content, tool_calls));
            }
        }
    }

    out
}

fn to_anthropic_tools(tools: &[ToolDefinition]) -> Vec<WireTool<'_>> {
    tools
        .iter()
        .map(|t| WireTool {
            name: &t.name,
            description: &t.description,
            input_schema: &t.parameters,
        })
        .collect()
}

fn decode_response(response: MessagesResponse) -> Completion {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ResponseBlock::Text { text: t } => text.push_str(&t),
            ResponseBlock::ToolUse { id, name, input } => {
                let id = if id.is_empty() { fresh_call_id() } else { id };
                tool_calls.push(ToolCall::new(id, name, encode_input(&input)));
            }
            ResponseBlock::Other => {}
        }
    }

    Completion {
        content: (!text.is_empty()).then_some(text),
        tool_calls,
        usage: response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
            })
            .unwrap_or_default(),
    }
}

/// Anthropic API client using `x-api-key` authentication.
#[derive(Clone)]
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_http(Client::new(), api_key)
    }

    pub fn with_http(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<Completion> {
        let (system, messages) = to_anthropic_messages(messages);
        let request = MessagesRequest {
            model,
            max_tokens: MAX_TOKENS,
            system,
            messages,
            tools: to_anthropic_tools(tools),
        };

        let response = self
            .client
            .post(self.build_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!("Anthropic API returned {}", status);
            return Err(Error::Provider(format!("Anthropic API error ({status}): {error_text}")));
        }

        let completion = decode_response(response.json().await?);
        debug!(
            "Anthropic completion: {} tool calls, {} input / {} output tokens",
            completion.tool_calls.len(),
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens
        );
        Ok(completion)
    }
}
