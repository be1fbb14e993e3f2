//! Error types for the authentication broker

use std::io;

use thiserror::Error;

/// Result type alias for the broker
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing or invalid setting; startup-fatal)
    #[error("Configuration error: {0}")]
    Config(String),

    /// OIDC discovery document could not be fetched or parsed (startup-fatal)
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Session store error (connection, command, or serialization failure)
    #[error("Session store error: {0}")]
    SessionStore(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
