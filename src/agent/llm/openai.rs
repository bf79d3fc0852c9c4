//! OpenAI chat-completions client.
//!
//! The canonical message list maps almost one-to-one onto this API: tool
//! results are `role: "tool"` entries and assistant tool calls keep their
//! JSON-string arguments.

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

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// One entry of the `messages` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<WireToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: WireFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Canonical messages to the OpenAI `messages` array.
pub fn to_openai_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| match m.role {
            Role::System => ChatMessage::System {
                content: m.text().to_string(),
            },
            Role::User => ChatMessage::User {
                content: m.text().to_string(),
            },
            Role::Assistant if m.has_tool_calls() => ChatMessage::Assistant {
                content: m.content.clone(),
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|tc| WireToolCall {
                        id: tc.id.clone(),
                        kind: function_kind(),
                        function: WireFunction {
                            name: tc.function.name.clone(),
                            arguments: tc.function.arguments.clone(),
                        },
                    })
                    .collect(),
            },
            Role::Assistant => ChatMessage::Assistant {
                content: Some(m.text().to_string()),
                tool_calls: Vec::new(),
            },
            Role::Tool => ChatMessage::Tool {
                tool_call_id: m.tool_call_id.clone().unwrap_or_default(),
                content: m.text().to_string(),
            },
        })
        .collect()
}

/// OpenAI `messages` array back to canonical messages.
pub fn from_openai_messages(messages: &[ChatMessage]) -> Vec<Message> {
    messages
        .iter()
        .map(|m| match m {
            ChatMessage::System { content } => Message::system(content.as_str()),
            ChatMessage::User { content } => Message::user(content.as_str()),
            ChatMessage::Assistant { content, tool_calls } => Message::assistant_with_tools(
                content.clone(),
                tool_calls.iter().map(decode_tool_call).collect(),
            ),
            ChatMessage::Tool { tool_call_id, content } => {
                Message::tool_result(tool_call_id.as_str(), content.as_str())
            }
        })
        .collect()
}

fn decode_tool_call(tc: &WireToolCall) -> ToolCall {
    let id = if tc.id.is_empty() { fresh_call_id() } else { tc.id.clone() };
    let arguments = if tc.function.arguments.trim().is_empty() {
        "{}".to_string()
    } else {
        tc.function.arguments.clone()
    };
    ToolCall::new(id, tc.function.name.clone(), arguments)
}

fn to_openai_tools(tools: &[ToolDefinition]) -> Vec<WireTool<'_>> {
    tools
        .iter()
        .map(|t| WireTool {
            kind: "function",
            function: WireFunctionDef {
                name: &t.name,
                description: &t.description,
                parameters: &t.parameters,
            },
        })
        .collect()
}

fn decode_response(response: ChatResponse) -> Completion {
    let usage = response
        .usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let Some(choice) = response.choices.into_iter().next() else {
        warn!("OpenAI response carried no choices");
        return Completion {
            usage,
            ..Completion::text("No response.")
        };
    };

    Completion {
        content: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls: choice
            .message
            .tool_calls
            .unwrap_or_default()
            .iter()
            .map(decode_tool_call)
            .collect(),
        usage,
    }
}

/// OpenAI API client using bearer-token authentication.
#[derive(Clone)]
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_http(Client::new(), api_key)
    }

    /// Share an existing connection pool.
    pub fn with_http(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<Completion> {
        let request = ChatRequest {
            model,
            messages: to_openai_messages(messages),
            tools: to_openai_tools(tools),
            tool_choice: (!tools.is_empty()).then_some("auto"),
        };

        let response = self
            .client
            .post(self.build_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!("OpenAI API returned {}", status);
            return Err(Error::Provider(format!("OpenAI API error ({status}): {error_text}")));
        }

        let completion = decode_response(response.json().await?);
        debug!(
            "OpenAI completion: {} tool calls, {} prompt / {} completion tokens",
            completion.tool_calls.len(),
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens
        );
        Ok(completion)
    }
}
