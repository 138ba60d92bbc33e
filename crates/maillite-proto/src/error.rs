//! Error types for MailLite protocol operations.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a MailLite server.
#[derive(Debug, Error)]
pub enum Error {
    /// The command socket could not be established.
    #[error("Connection to {addr} failed: {source}")]
    ConnectFailed {
        /// Address we tried to reach.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// No reply arrived within the idle bound.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// A reply line could not be classified or was malformed.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The server refused the handshake or the credentials.
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// The server answered 550.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The command channel is closed or the peer went away.
    #[error("Disconnected from server")]
    Disconnected,

    /// A multi-line reply ended before its terminator.
    #[error("Reply truncated after {} line(s)", .collected.len())]
    Truncated {
        /// Lines received before the stream closed.
        collected: Vec<String>,
    },

    /// The server answered with a status other than the expected one.
    #[error("Server replied {code}: {message}")]
    Rejected {
        /// Status code of the reply.
        code: u16,
        /// Remaining reply text.
        message: String,
    },

    /// The recipient list has no usable entries.
    #[error("Invalid recipients: {0:?}")]
    InvalidRecipients(String),

    /// A single-line field contains characters the protocol cannot carry.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A reply line exceeded the read limit; the rest of the reply is lost.
    #[error("Reply line exceeds {0} bytes")]
    LineTooLong(usize),

    /// Message body exceeds the configured size limit.
    #[error("Message exceeds size limit: {0} bytes")]
    MessageTooLarge(usize),

    /// I/O error on the notification socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Creates a rejection error from a status code and reply text.
    #[must_use]
    pub fn rejected(code: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }

    /// Returns true if the command connection can no longer be used.
    #[must_use]
    pub const fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Self::Disconnected
                | Self::Timeout(_)
                | Self::Truncated { .. }
                | Self::LineTooLong(_)
        )
    }

    /// Returns true if the channel reported a dead socket.
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Truncated { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn connection_faults() {
        assert!(Error::Disconnected.is_connection_fault());
        assert!(Error::Timeout(Duration::from_secs(1)).is_connection_fault());
        assert!(
            Error::Truncated {
                collected: vec!["213 1 bob 10 0".into()]
            }
            .is_connection_fault()
        );
        assert!(Error::LineTooLong(1024).is_connection_fault());
        assert!(!Error::LineTooLong(1024).is_disconnected());
        assert!(!Error::NotFound("550 no such message".into()).is_connection_fault());
        assert!(!Error::rejected(500, "bad").is_connection_fault());
    }

    #[test]
    fn timeout_is_not_disconnect() {
        assert!(!Error::Timeout(Duration::from_secs(30)).is_disconnected());
        assert!(Error::Disconnected.is_disconnected());
    }

    #[test]
    fn display() {
        assert_eq!(
            Error::rejected(502, "unknown command").to_string(),
            "Server replied 502: unknown command"
        );
        assert_eq!(
            Error::Truncated {
                collected: vec!["a".into(), "b".into()]
            }
            .to_string(),
            "Reply truncated after 2 line(s)"
        );
    }
}
