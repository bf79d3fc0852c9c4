//! LLM client abstraction layer.
//!
//! This module provides:
//! - [`LlmClient`] trait for swappable LLM providers
//! - [`ModelRef`] for `"<provider>/<model-id>"` model strings
//! - [`ProviderRouter`], which picks a concrete client per model string
//! - Concrete implementations: OpenAI chat completions, Anthropic messages
//!
//! Vendor wire shapes stay private to their module; callers only ever see
//! canonical [`Message`] and [`ToolCall`] values.
//!
//! # Adding a New Provider
//!
//! 1. Create a new file (e.g., `gemini.rs`) with its wire types
//! 2. Implement `LlmClient` trait
//! 3. Add a [`Provider`] variant and a prefix in [`ModelRef::parse`]
//! 4. Route it in [`ProviderRouter`]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

use super::message::{Message, ToolCall};

/// Canonical result of one completion call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    /// Text content; `None` exactly when the model emitted no text.
    pub content: Option<String>,

    /// Tool calls requested by the model, in the order emitted.
    pub tool_calls: Vec<ToolCall>,

    /// Token usage statistics.
    pub usage: Usage,
}

impl Completion {
    /// Create a plain text completion.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Create a completion that only requests tool calls.
    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }

    #[inline]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// LLM client trait: swappable provider abstraction.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send the conversation and tool catalog, get one completion back.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<Completion>;

    /// Check that `model` can be served without issuing a request.
    fn preflight(&self, _model: &str) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Box<T> {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<Completion> {
        (**self).complete(messages, tools, model).await
    }

    fn preflight(&self, model: &str) -> Result<()> {
        (**self).preflight(model)
    }
}

/// A supported completion backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
}

impl Provider {
    /// Environment variable holding this provider's API key.
    pub fn credential_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Anthropic => "Anthropic",
        }
    }

    fn missing_credential(self) -> Error {
        Error::MissingCredential {
            var: self.credential_var(),
            provider: self.display_name(),
        }
    }
}

/// A model string split into provider and vendor model id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef<'a> {
    pub provider: Provider,
    pub model_id: &'a str,
}

impl<'a> ModelRef<'a> {
    const OPENAI_PREFIX: &'static str = "openai/";
    const ANTHROPIC_PREFIX: &'static str = "anthropic/";

    /// Unprefixed or unrecognized strings go to OpenAI unchanged.
    pub fn parse(model: &'a str) -> Self {
        if let Some(id) = model.strip_prefix(Self::ANTHROPIC_PREFIX) {
            return Self { provider: Provider::Anthropic, model_id: id };
        }
        if let Some(id) = model.strip_prefix(Self::OPENAI_PREFIX) {
            return Self { provider: Provider::OpenAi, model_id: id };
        }
        Self { provider: Provider::OpenAi, model_id: model }
    }
}

/// Id for a tool call the vendor returned without one.
pub(crate) fn fresh_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Routes each completion to the provider named by the model string.
///
/// A provider without a credential stays unconfigured; selecting it fails
/// with [`Error::MissingCredential`] before any request is built.
pub struct ProviderRouter {
    openai: Option<OpenAiClient>,
    anthropic: Option<AnthropicClient>,
}

impl ProviderRouter {
    /// Build clients from `OPENAI_API_KEY` / `ANTHROPIC_API_KEY`, honouring
    /// `OPENAI_BASE_URL` / `ANTHROPIC_BASE_URL` overrides.
    pub fn from_env() -> Self {
        let http = reqwest::Client::new();
        let openai = env_key(Provider::OpenAi).map(|key| {
            let client = OpenAiClient::with_http(http.clone(), key);
            match std::env::var("OPENAI_BASE_URL") {
                Ok(url) if !url.is_empty() => client.with_base_url(url),
                _ => client,
            }
        });
        let anthropic = env_key(Provider::Anthropic).map(|key| {
            let client = AnthropicClient::with_http(http.clone(), key);
            match std::env::var("ANTHROPIC_BASE_URL") {
                Ok(url) if !url.is_empty() => client.with_base_url(url),
                _ => client,
            }
        });
        Self { openai, anthropic }
    }

    pub fn new(openai: Option<OpenAiClient>, anthropic: Option<AnthropicClient>) -> Self {
        Self { openai, anthropic }
    }

    fn client_for(&self, provider: Provider) -> Result<&dyn LlmClient> {
        let client: Option<&dyn LlmClient> = match provider {
            Provider::OpenAi => self.openai.as_ref().map(|c| c as &dyn LlmClient),
            Provider::Anthropic => self.anthropic.as_ref().map(|c| c as &dyn LlmClient),
        };
        client.ok_or_else(|| provider.missing_credential())
    }
}

fn env_key(provider: Provider) -> Option<String> {
    std::env::var(provider.credential_var())
        .ok()
        .filter(|key| !key.trim().is_empty())
}

#[async_trait]
impl LlmClient for ProviderRouter {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<Completion> {
        let model_ref = ModelRef::parse(model);
        let client = self.client_for(model_ref.provider)?;
        debug!("Routing {} to {:?}", model, model_ref.provider);
        client.complete(messages, tools, model_ref.model_id).await
    }

    fn preflight(&self, model: &str) -> Result<()> {
        self.client_for(ModelRef::parse(model).provider).map(|_| ())
    }
}

/// Scripted LLM client for testing.
///
/// Hands out queued completions in order, then keeps returning the
/// `repeat` completion (if any). Every request's messages are recorded.
#[cfg(test)]
pub struct ScriptedClient {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<Completion>>>,
    repeat: Option<Completion>,
    requests: std::sync::Mutex<Vec<Vec<Message>>>,
}

#[cfg(test)]
impl ScriptedClient {
    pub fn new(responses: Vec<Completion>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into_iter().map(Ok).collect()),
            repeat: None,
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Create with predefined text responses.
    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Completion::text(*t)).collect())
    }

    /// Return `completion` on every call.
    pub fn repeating(completion: Completion) -> Self {
        Self {
            repeat: Some(completion),
            ..Self::new(Vec::new())
        }
    }

    /// Fail the first call with `error`.
    pub fn failing(error: Error) -> Self {
        Self {
            responses: std::sync::Mutex::new(vec![Err(error)].into()),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
        _model: &str,
    ) -> Result<Completion> {
        self.requests.lock().unwrap().push(messages.to_vec());
        if let Some(next) = self.responses.lock().unwrap().pop_front() {
            return next;
        }
        self.repeat
            .clone()
            .ok_or_else(|| Error::Provider("No more scripted responses".to_string()))
    }
}

/// One-shot HTTP responder standing in for a vendor endpoint.
#[cfg(test)]
pub(crate) mod mock_http {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve a single request with `status` and a JSON `body`.
    ///
    /// Returns the base URL and a handle resolving to the raw request text.
    pub async fn serve_once(status: &'static str, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                if request_complete(&request) {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });

        (format!("http://{}", addr), handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..head_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        raw.len() >= head_end + 4 + content_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_ref_prefixes() {
        assert_eq!(
            ModelRef::parse("anthropic/claude-sonnet-4"),
            ModelRef { provider: Provider::Anthropic, model_id: "claude-sonnet-4" }
        );
        assert_eq!(
            ModelRef::parse("openai/gpt-4o"),
            ModelRef { provider: Provider::OpenAi, model_id: "gpt-4o" }
        );
        assert_eq!(
            ModelRef::parse("gpt-4o-mini"),
            ModelRef { provider: Provider::OpenAi, model_id: "gpt-4o-mini" }
        );
        assert_eq!(
            ModelRef::parse("mistral/large"),
            ModelRef { provider: Provider::OpenAi, model_id: "mistral/large" }
        );
    }

    #[test]
    fn test_credential_var_follows_model_prefix() {
        assert_eq!(ModelRef::parse("anthropic/claude").provider.credential_var(), "ANTHROPIC_API_KEY");
        assert_eq!(ModelRef::parse("gpt-4o-mini").provider.credential_var(), "OPENAI_API_KEY");
    }

    #[test]
    fn test_router_preflight_missing_credential() {
        let router = ProviderRouter::new(Some(OpenAiClient::new("sk-test")), None);
        assert!(router.preflight("gpt-4o-mini").is_ok());

        let err = router.preflight("anthropic/claude").unwrap_err();
        assert!(matches!(err, Error::MissingCredential { var: "ANTHROPIC_API_KEY", .. }));
    }

    #[tokio::test]
    async fn test_router_fails_before_network() {
        let router = ProviderRouter::new(None, None);
        let err = router
            .complete(&[Message::user("hi")], &[], "gpt-4o-mini")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCredential { var: "OPENAI_API_KEY", .. }));
    }

    #[tokio::test]
    async fn test_scripted_client() {
        let client = ScriptedClient::texts(&["Hello!", "World!"]);

        let first = client.complete(&[], &[], "m").await.unwrap();
        assert_eq!(first.content.as_deref(), Some("Hello!"));

        let second = client.complete(&[], &[], "m").await.unwrap();
        assert_eq!(second.content.as_deref(), Some("World!"));

        assert!(client.complete(&[], &[], "m").await.is_err());
        assert_eq!(client.calls(), 3);
    }
}
