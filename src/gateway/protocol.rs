//! Gateway wire protocol.
//!
//! Every WebSocket text message is one JSON frame tagged by `type`:
//! `req` (client request), `res` (direct reply to a request id) or `event`
//! (server push). Agent events carry no request id, so a connection is
//! expected to have a single outstanding `agent` request at a time.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Error;
use crate::Result;

/// Event name for agent progress and completion
pub const AGENT_EVENT: &str = "agent";

/// Session used when a request names none
pub const DEFAULT_SESSION_ID: &str = "main";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireFrame {
    #[serde(rename = "req")]
    Request(Request),
    #[serde(rename = "res")]
    Response(Response),
    #[serde(rename = "event")]
    Event(Event),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Agent,
    Health,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event: String,
    pub payload: Value,
}

/// Parameters of an `agent` request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AgentParams {
    /// Lenient decode: absent or mistyped params fall back to defaults.
    pub fn from_params(params: Option<&Value>) -> Self {
        params
            .and_then(|p| serde_json::from_value(p.clone()).ok())
            .unwrap_or_default()
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    pub fn session_id(&self) -> &str {
        self.session_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SESSION_ID)
    }
}

/// Payload of an `agent` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentEvent {
    Done {
        done: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Chunk {
        chunk: String,
    },
}

impl AgentEvent {
    pub fn chunk(chunk: impl Into<String>) -> Self {
        AgentEvent::Chunk { chunk: chunk.into() }
    }

    pub fn finished(content: impl Into<String>) -> Self {
        AgentEvent::Done {
            done: true,
            content: Some(content.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        AgentEvent::Done {
            done: true,
            content: None,
            error: Some(error.into()),
        }
    }
}

impl WireFrame {
    /// Immediate acknowledgement of a request; carries no payload.
    pub fn ack(id: &str) -> Self {
        WireFrame::Response(Response {
            id: id.to_string(),
            ok: true,
            payload: None,
            error: None,
        })
    }

    pub fn health(id: &str) -> Self {
        WireFrame::Response(Response {
            id: id.to_string(),
            ok: true,
            payload: Some(json!({"status": "ok"})),
            error: None,
        })
    }

    pub fn agent(event: AgentEvent) -> Self {
        WireFrame::Event(Event {
            event: AGENT_EVENT.to_string(),
            // Plain data enum; serializing it cannot fail.
            payload: serde_json::to_value(event).unwrap_or(Value::Null),
        })
    }

    pub fn request(id: impl Into<String>, method: Method, params: Option<Value>) -> Self {
        WireFrame::Request(Request {
            id: id.into(),
            method,
            params,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The agent payload, if this is an `agent` event.
    pub fn as_agent_event(&self) -> Option<AgentEvent> {
        match self {
            WireFrame::Event(Event { event, payload }) if event == AGENT_EVENT => {
                serde_json::from_value(payload.clone()).ok()
            }
            _ => None,
        }
    }
}

/// Decode an inbound frame, accepting only requests with a non-empty id.
pub fn parse_request(text: &str) -> Result<Request> {
    let frame: WireFrame = serde_json::from_str(text)
        .map_err(|e| Error::Protocol(format!("malformed frame: {}", e)))?;
    match frame {
        WireFrame::Request(req) if !req.id.is_empty() => Ok(req),
        WireFrame::Request(_) => Err(Error::Protocol("request without id".to_string())),
        _ => Err(Error::Protocol("expected a request frame".to_string())),
    }
}
