//! Agent module - core agent logic.
//!
//! This module contains:
//! - Canonical message types ([`Message`], [`ToolCall`])
//! - LLM client trait and provider implementations
//! - The bounded agent loop
//! - System prompt and message-list assembly
//!
//! # Adding a New LLM Provider
//!
//! See [`llm`] for instructions.

mod context;
mod loop_impl;
mod message;

// LLM providers in submodule
pub mod llm;

// Re-exports for convenience
pub use context::{build_messages, load_system_prompt, DEFAULT_SYSTEM_PROMPT};
pub use llm::{Completion, LlmClient, ModelRef, Provider, ProviderRouter, Usage};
pub use loop_impl::{
    AgentLoop, ChunkSink, RunOptions, EMPTY_REPLY_FALLBACK, MAX_TURNS_FALLBACK, TURN_LIMIT,
};
pub use message::{FunctionCall, Message, Role, ToolCall};
