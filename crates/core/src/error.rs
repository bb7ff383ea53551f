//! Error types for the core library.

use thiserror::Error;

/// Main error type for the core library.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Conversation id does not resolve
    #[error("conversation not found: {0}")]
    NotFound(String),

    /// Durable append was rejected or could not reach the backend
    #[error("failed to write message: {0}")]
    WriteFailure(String),

    /// A change subscription could not be established or was dropped
    #[error("subscription failure: {0}")]
    SubscriptionFailure(String),

    /// Network blip during a load or reload
    #[error("network error: {0}")]
    TransientNetwork(String),

    /// Message text is empty or whitespace only
    #[error("message text cannot be empty")]
    EmptyMessage,

    /// Message text exceeds the configured maximum
    #[error("message text exceeds maximum length of {0} bytes")]
    MessageTooLong(usize),

    /// Operation requires a ready session
    #[error("session is not ready")]
    NotReady,

    /// Operation attempted on a closed session
    #[error("session is closed")]
    Closed,

    /// No local message with the given id
    #[error("unknown message: {0}")]
    UnknownMessage(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether the failure ends the session it occurred in.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Closed)
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::NotFound("c1".to_string()).is_fatal());
        assert!(Error::Closed.is_fatal());
        assert!(!Error::WriteFailure("503".to_string()).is_fatal());
        assert!(!Error::SubscriptionFailure("dropped".to_string()).is_fatal());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::MessageTooLong(10).to_string(),
            "message text exceeds maximum length of 10 bytes"
        );
        assert_eq!(Error::EmptyMessage.to_string(), "message text cannot be empty");
    }
}
