//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur in session operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Protocol operation failed.
    #[error(transparent)]
    Protocol(#[from] maillite_proto::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation not valid in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Returns the protocol error, if this is one.
    #[must_use]
    pub const fn protocol(&self) -> Option<&maillite_proto::Error> {
        match self {
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the session has no usable connection.
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self, Self::Protocol(e) if e.is_disconnected())
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
