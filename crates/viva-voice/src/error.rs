//! Error types for the interview turn-taking core

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while running an interview session
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Protocol decode error: {0}")]
    Protocol(String),

    #[error("Channel not ready")]
    ChannelNotReady,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
