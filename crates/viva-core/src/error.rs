//! Error types shared by the interview core and its collaborators.

use thiserror::Error;

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by configuration loading and collaborator calls.
///
/// None of these are fatal to a running session: callers degrade to empty
/// context or default configuration and keep the turn moving.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Context retrieval failed: {0}")]
    Retrieval(String),

    #[error("Session credential unavailable: {0}")]
    Credential(String),

    #[error("Runtime config fetch failed: {0}")]
    RuntimeConfig(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}
