//! Gateway server
//!
//! One listener serves both the WebSocket endpoint (`/ws`) and a few plain
//! HTTP routes. Each connection gets its own task; each `agent` request runs
//! on a task of its own and reports back through the connection's writer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::agent::{load_system_prompt, AgentLoop, LlmClient, ProviderRouter, RunOptions};
use crate::config::{self, Config};
use crate::error::Error;
use crate::tools::ToolRunner;
use crate::Result;

use super::protocol::{parse_request, AgentEvent, AgentParams, Method, WireFrame};
use super::sessions::SessionStore;

/// Static web chat page served on `/`
const WEBCHAT_HTML: &str = include_str!("webchat.html");

/// Largest request head inspected when routing a connection
const HEAD_LIMIT: usize = 8192;

/// Deadline for a client to finish sending its request head
const HEAD_TIMEOUT: Duration = Duration::from_secs(30);

/// State shared by every connection and agent task.
struct Shared<C: LlmClient> {
    agent: AgentLoop<C>,
    sessions: Arc<SessionStore>,
    system_prompt: String,
    model: String,
}

pub struct GatewayServer<C: LlmClient + 'static> {
    shared: Arc<Shared<C>>,
}

impl<C: LlmClient + 'static> GatewayServer<C> {
    pub fn new(
        agent: AgentLoop<C>,
        sessions: SessionStore,
        system_prompt: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                agent,
                sessions: Arc::new(sessions),
                system_prompt: system_prompt.into(),
                model: model.into(),
            }),
        }
    }

    pub fn sessions(&self) -> Arc<SessionStore> {
        Arc::clone(&self.shared.sessions)
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Gateway shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("Connection from {}", peer);
                        let shared = Arc::clone(&self.shared);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(shared, stream).await {
                                debug!("Connection from {} ended: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
            }
        }
    }
}

/// Build the production gateway from `config` and serve until Ctrl-C.
pub async fn run(config: &Config) -> Result<()> {
    let workspace = &config.agent.workspace;
    let tools = ToolRunner::with_defaults(workspace);
    info!("Tools: {}", tools.tool_names().join(", "));
    let agent = AgentLoop::new(ProviderRouter::from_env(), tools);
    let server = GatewayServer::new(
        agent,
        SessionStore::open(config::sessions_dir()),
        load_system_prompt(workspace),
        config.agent.model.clone(),
    );

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Config(format!("Failed to bind gateway on {}: {}", addr, e)))?;
    info!("Gateway listening on ws://{}/ws", addr);
    crate::ui::print_gateway_banner(&addr, &config.agent.model, workspace);

    server
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}

/// Where a fresh connection should go, decided from its request head.
#[derive(Debug, PartialEq, Eq)]
enum Route {
    WebSocket,
    Health,
    Index,
    NotFound,
}

/// Request line and headers of an inbound HTTP request.
struct RequestHead {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    fn parse(text: &str) -> Self {
        let mut lines = text.lines();
        let mut request_line = lines.next().unwrap_or("").split_whitespace();
        let method = request_line.next().unwrap_or("").to_string();
        let target = request_line.next().unwrap_or("");
        let path = target.split('?').next().unwrap_or("").to_string();

        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect();

        Self { method, path, headers }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn route(&self) -> Route {
        if self.method != "GET" {
            return Route::NotFound;
        }

        let upgrade = self
            .header("upgrade")
            .is_some_and(|value| value.eq_ignore_ascii_case("websocket"));

        match self.path.as_str() {
            "/ws" if upgrade && self.header("sec-websocket-key").is_some() => Route::WebSocket,
            "/health" => Route::Health,
            "/" | "/index.html" => Route::Index,
            _ => Route::NotFound,
        }
    }
}

/// Read until the end of the request head, waiting at most `HEAD_TIMEOUT`.
///
/// Returns the parsed head and any bytes that arrived after it.
async fn read_head(stream: &mut TcpStream) -> Result<(RequestHead, Vec<u8>)> {
    let mut buf = Vec::with_capacity(1024);
    let end = tokio::time::timeout(HEAD_TIMEOUT, fill_head(stream, &mut buf))
        .await
        .map_err(|_| Error::Protocol("request head not received in time".to_string()))??;

    let rest = buf.split_off(end);
    Ok((RequestHead::parse(&String::from_utf8_lossy(&buf)), rest))
}

async fn fill_head(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Result<usize> {
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            return Ok(pos + 4);
        }
        if buf.len() >= HEAD_LIMIT {
            return Err(Error::Protocol("request head too large".to_string()));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::Protocol("connection closed before a complete request".to_string()));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn handle_connection<C: LlmClient + 'static>(
    shared: Arc<Shared<C>>,
    mut stream: TcpStream,
) -> Result<()> {
    let (head, rest) = read_head(&mut stream).await?;

    let (status, content_type, body) = match head.route() {
        Route::WebSocket => return upgrade(shared, stream, &head, rest).await,
        Route::Health => ("200 OK", "application/json", r#"{"status":"ok"}"#),
        Route::Index => ("200 OK", "text/html; charset=utf-8", WEBCHAT_HTML),
        Route::NotFound => ("404 Not Found", "text/plain", "Not Found"),
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

/// Finish the WebSocket handshake on an already-read request head.
async fn upgrade<C: LlmClient + 'static>(
    shared: Arc<Shared<C>>,
    mut stream: TcpStream,
    head: &RequestHead,
    rest: Vec<u8>,
) -> Result<()> {
    let key = head
        .header("sec-websocket-key")
        .ok_or_else(|| Error::Protocol("missing Sec-WebSocket-Key".to_string()))?;

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        derive_accept_key(key.as_bytes())
    );
    stream.write_all(response.as_bytes()).await?;

    let ws = WebSocketStream::from_partially_read(stream, rest, Role::Server, None).await;
    handle_websocket(shared, ws).await
}

/// Sending half of a connection's outbound frame queue.
#[derive(Clone)]
struct Outbound(mpsc::UnboundedSender<String>);

impl Outbound {
    fn send(&self, frame: WireFrame) {
        match frame.to_json() {
            // A closed queue means the client left; nothing to report to.
            Ok(json) => {
                let _ = self.0.send(json);
            }
            Err(e) => warn!("Failed to encode outbound frame: {}", e),
        }
    }
}

async fn handle_websocket<C: LlmClient + 'static>(
    shared: Arc<Shared<C>>,
    ws: WebSocketStream<TcpStream>,
) -> Result<()> {
    info!("WebSocket client connected");

    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let outbound = Outbound(tx);
    while let Some(incoming) = source.next().await {
        match incoming {
            Ok(WsMessage::Text(text)) => handle_frame(&shared, text.as_str(), &outbound),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("WebSocket read failed: {}", e);
                break;
            }
        }
    }

    info!("WebSocket client disconnected");
    Ok(())
}

fn handle_frame<C: LlmClient + 'static>(shared: &Arc<Shared<C>>, text: &str, outbound: &Outbound) {
    let request = match parse_request(text) {
        Ok(request) => request,
        Err(e) => {
            debug!("Dropping frame: {}", e);
            return;
        }
    };

    outbound.send(WireFrame::ack(&request.id));

    match request.method {
        Method::Health => outbound.send(WireFrame::health(&request.id)),
        Method::Agent => {
            let params = AgentParams::from_params(request.params.as_ref());
            let shared = Arc::clone(shared);
            let outbound = outbound.clone();
            tokio::spawn(async move { shared.handle_agent(params, outbound).await });
        }
        Method::Unknown => debug!("Ignoring request {} with unknown method", request.id),
    }
}

impl<C: LlmClient> Shared<C> {
    async fn handle_agent(&self, params: AgentParams, outbound: Outbound) {
        let session_id = params.session_id();
        let message = params.message();
        info!("Agent request for session {} ({} chars)", session_id, message.len());

        match self.respond(session_id, message, &outbound).await {
            Ok(reply) => {
                // Saved before `done` so a follow-up request already sees this exchange.
                if let Err(e) = self.sessions.append(session_id, message, &reply).await {
                    warn!("Reply for session {} not saved: {}", session_id, e);
                }
                outbound.send(WireFrame::agent(AgentEvent::finished(reply)));
            }
            Err(e) => {
                warn!(
                    "Agent request for session {} failed ({:?}): {}",
                    session_id,
                    e.kind(),
                    e
                );
                outbound.send(WireFrame::agent(AgentEvent::failed(e.to_string())));
            }
        }
    }

    async fn respond(&self, session_id: &str, message: &str, outbound: &Outbound) -> Result<String> {
        self.agent.preflight(&self.model)?;

        let history = self.sessions.get(session_id).await;
        let on_chunk = |chunk: &str| outbound.send(WireFrame::agent(AgentEvent::chunk(chunk)));
        let options = RunOptions::new(&self.system_prompt, &self.model)
            .with_history(&history)
            .with_on_chunk(&on_chunk);

        self.agent.run(message, options).await
    }
}
