//! Error types for emergent-mind

use thiserror::Error;

/// Result type alias for emergent-mind operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in emergent-mind
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A provider was selected but its credential is not set.
    #[error("{var} is required for {provider} models.")]
    MissingCredential {
        var: &'static str,
        provider: &'static str,
    },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("{0}")]
    Gateway(String),

    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Gateway did not respond in time")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Closed classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Provider,
    Tool,
    Protocol,
    Gateway,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::MissingCredential { .. } => ErrorKind::Config,
            Error::Provider(_) | Error::Http(_) => ErrorKind::Provider,
            Error::Tool(_) => ErrorKind::Tool,
            Error::Protocol(_) | Error::WebSocket(_) => ErrorKind::Protocol,
            Error::Gateway(_) | Error::GatewayUnavailable(_) | Error::Timeout => {
                ErrorKind::Gateway
            }
            Error::Session(_) | Error::Io(_) | Error::Json(_) => {
                ErrorKind::Internal
            }
        }
    }
}
