//! Gateway - long-lived WebSocket front end for the agent
//!
//! - [`protocol`]: JSON frames exchanged over the socket
//! - [`GatewayServer`]: accepts connections and runs agent requests
//! - [`SessionStore`]: per-session history, persisted as JSON files
//! - [`GatewayClient`]: sends one request and waits for the reply
//! - [`handle_message`]: the same agent, run directly without a gateway

mod client;
mod inprocess;
mod server;
mod sessions;

pub mod protocol;

pub use client::{GatewayClient, DEFAULT_TIMEOUT};
pub use inprocess::{handle_message, run_once};
pub use server::{run, GatewayServer};
pub use sessions::{sanitize_id, SessionStore};
