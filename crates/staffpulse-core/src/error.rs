//! Error types for StaffPulse

/// Result type alias using StaffPulse's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for StaffPulse operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Room name failed validation
    #[error("invalid room name: {0}")]
    InvalidRoom(String),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a new invalid room error
    pub fn invalid_room(msg: impl Into<String>) -> Self {
        Self::InvalidRoom(msg.into())
    }
}
