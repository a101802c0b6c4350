//! Error types for agentlens-core

use thiserror::Error;

/// Main error type for the agentlens-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error for provider logs
    #[error("parse error in {provider} log: {message}")]
    Parse { provider: String, message: String },

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Snapshot persistence error
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

/// Result type alias for agentlens-core
pub type Result<T> = std::result::Result<T, Error>;
