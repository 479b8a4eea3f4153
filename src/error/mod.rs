//! Error types for the token provider.

pub mod classify;

pub use classify::{classify, from_server};

use thiserror::Error;

/// Errors surfaced by token acquisition and authenticated requests.
///
/// Every variant owns plain data so a single failed acquisition can be handed
/// to all coalesced waiters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error (status {status}): {}", display_http(code.as_deref(), message))]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Authorization failed: {code}: {message}")]
    Authorization { code: String, message: String },

    #[error("Auth flow configuration error: {0}")]
    FlowConfig(String),

    #[error("Authentication exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Redirect listener error: {0}")]
    Listener(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AuthError {
    /// Create an HTTP status error without a server error code.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn display_http(code: Option<&str>, message: &str) -> String {
    match code {
        Some(code) if message.is_empty() => code.to_string(),
        Some(code) => format!("{code}: {message}"),
        None => message.to_string(),
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AuthError>;
