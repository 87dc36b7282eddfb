//! Client error types

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the connection manager and transports
#[derive(Debug, Error)]
pub enum ClientError {
    /// No admitted connection to send on
    #[error("not connected")]
    NotConnected,

    /// The server refused the handshake credential
    #[error("handshake rejected by server")]
    Rejected,

    /// Transport-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Encoding or decoding a wire message failed
    #[error("protocol error: {0}")]
    Protocol(#[from] staffpulse_core::Error),

    /// Invalid client configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The manager task is gone
    #[error("connection manager stopped")]
    Stopped,
}

impl ClientError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
