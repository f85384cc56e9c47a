//! Unified error type for the bridge
//!
//! Every fallible operation in the crate returns [`BridgeError`]. Adapter
//! specific errors (OAuth, encryption, HTTP, SQLite) are folded into one of
//! its variants at the module boundary so the sync core only has to reason
//! about a handful of categories:
//! - authentication problems that suspend polling for a user
//! - transient remote failures that are worth retrying
//! - per-message delivery/retraction problems that are logged and absorbed
//! - cancellation, which always propagates untouched

use thiserror::Error;

/// Application error type for the sync core, adapters and bot front-end
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    #[error("Mail API error: {0}")]
    MailApi(String),

    #[error("Telegram API error: {0}")]
    Telegram(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Retraction failed: {0}")]
    RetractionFailed(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BridgeError::Cancelled)
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, BridgeError::Auth(_))
    }
}

// Implement From for common error types

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for BridgeError {
    fn from(err: toml::de::Error) -> Self {
        BridgeError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Parse(err.to_string())
    }
}

impl From<r2d2::Error> for BridgeError {
    fn from(err: r2d2::Error) -> Self {
        BridgeError::Database(err.to_string())
    }
}

impl From<rusqlite::Error> for BridgeError {
    fn from(err: rusqlite::Error) -> Self {
        BridgeError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::Network(err.to_string())
    }
}

impl From<String> for BridgeError {
    fn from(err: String) -> Self {
        BridgeError::Other(err)
    }
}

impl From<&str> for BridgeError {
    fn from(err: &str) -> Self {
        BridgeError::Other(err.to_string())
    }
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
