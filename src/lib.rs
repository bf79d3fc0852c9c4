//! Emergent Mind - a tool-using agent behind a streaming WebSocket gateway
//!
//! This library provides the bounded agent loop, provider adapters for
//! OpenAI and Anthropic, the default host tools, and the gateway with its
//! session store and client.

pub mod agent;
pub mod config;
pub mod error;
pub mod gateway;
pub mod tools;
pub mod ui;

pub use error::{Error, ErrorKind, Result};
