//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub agent: AgentConfig,
}

/// Where the gateway listens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model string, e.g. `gpt-4o-mini` or `anthropic/claude-sonnet-4-20250514`
    #[serde(default = "default_model")]
    pub model: String,

    /// Workspace for prompt files and tool working directory
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
}

fn default_port() -> u16 {
    18789
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_model() -> String {
    std::env::var("OPENAI_MODEL")
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "gpt-4o-mini".to_string())
}

fn default_workspace() -> PathBuf {
    config_dir().join("workspace")
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            workspace: default_workspace(),
        }
    }
}

impl Config {
    /// `ws://<bind>:<port>/ws`
    pub fn gateway_url(&self) -> String {
        format!("ws://{}:{}/ws", self.gateway.bind, self.gateway.port)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.gateway.bind, self.gateway.port)
    }
}

/// Get the config directory path (`$EMERGENT_MIND_CONFIG_DIR` or `~/.emergent-mind`)
pub fn config_dir() -> PathBuf {
    match std::env::var_os("EMERGENT_MIND_CONFIG_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".emergent-mind"),
    }
}

/// Get the config file path (`$EMERGENT_MIND_CONFIG` or `<config_dir>/config.json`)
pub fn config_path() -> PathBuf {
    match std::env::var_os("EMERGENT_MIND_CONFIG") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_dir().join("config.json"),
    }
}

/// Directory holding one JSON file per gateway session
pub fn sessions_dir() -> PathBuf {
    config_dir().join("sessions")
}

/// Load configuration from the default location
pub fn load() -> Config {
    load_from(&config_path())
}

/// Load configuration from `path`.
///
/// A missing or invalid file yields defaults; `OPENAI_MODEL` always wins
/// over the file's model.
pub fn load_from(path: &Path) -> Config {
    let mut config = match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring invalid config at {:?}: {}", path, e);
            Config::default()
        }),
        Err(_) => {
            debug!("No config at {:?}, using defaults", path);
            Config::default()
        }
    };

    if let Ok(model) = std::env::var("OPENAI_MODEL") {
        if !model.is_empty() {
            config.agent.model = model;
        }
    }

    config
}
