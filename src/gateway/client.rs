//! Gateway client - one `agent` request per connection

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

use crate::error::Error;
use crate::Result;

use super::protocol::{AgentEvent, Method, WireFrame};

/// Default wall-clock limit for a whole request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct GatewayClient {
    url: String,
    timeout: Duration,
}

impl GatewayClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send `message` and wait for the final reply.
    ///
    /// Each streamed chunk is passed to `on_chunk` as it arrives. Giving up
    /// on timeout does not stop the run on the gateway.
    pub async fn send<F>(&self, message: &str, session_id: Option<&str>, mut on_chunk: F) -> Result<String>
    where
        F: FnMut(&str),
    {
        tokio::time::timeout(self.timeout, self.exchange(message, session_id, &mut on_chunk))
            .await
            .unwrap_or(Err(Error::Timeout))
    }

    async fn exchange<F>(&self, message: &str, session_id: Option<&str>, on_chunk: &mut F) -> Result<String>
    where
        F: FnMut(&str),
    {
        let (mut ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::GatewayUnavailable(format!("{}: {}", self.url, e)))?;

        let id = format!("agent-{}", chrono::Utc::now().timestamp_millis());
        let mut params = json!({ "message": message });
        if let Some(session_id) = session_id {
            params["sessionId"] = json!(session_id);
        }
        let request = WireFrame::request(id, Method::Agent, Some(params)).to_json()?;
        ws.send(WsMessage::Text(request.into())).await?;

        let mut collected = String::new();
        while let Some(incoming) = ws.next().await {
            let text = match incoming? {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => break,
                _ => continue,
            };

            let frame: WireFrame = match serde_json::from_str(text.as_str()) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("Ignoring unreadable frame from gateway: {}", e);
                    continue;
                }
            };

            match frame.as_agent_event() {
                Some(AgentEvent::Chunk { chunk }) => {
                    on_chunk(&chunk);
                    collected.push_str(&chunk);
                }
                Some(AgentEvent::Done { error: Some(error), .. }) => {
                    let _ = ws.close(None).await;
                    return Err(Error::Gateway(error));
                }
                Some(AgentEvent::Done { content, .. }) => {
                    let _ = ws.close(None).await;
                    return Ok(content.unwrap_or(collected));
                }
                None => {}
            }
        }

        Err(Error::Gateway(
            "Gateway closed the connection before the reply finished".to_string(),
        ))
    }
}
