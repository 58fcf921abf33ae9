//! Error types for atem-client.

use thiserror::Error;

use crate::protocol::Tag;

/// Main error type for all switcher operations.
#[derive(Debug, Error)]
pub enum AtemError {
    /// Socket failure. Fatal for the session; there is no automatic retry.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Fewer than 12 bytes where a datagram header was expected.
    #[error("Truncated header: {len} bytes, need 12")]
    TruncatedHeader { len: usize },

    /// Header length inconsistent with the datagram that carried it.
    #[error("Malformed datagram: {0}")]
    MalformedDatagram(String),

    /// Record length overruns its datagram, or a body is too short for its tag.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// Well-formed record that nobody subscribed to.
    #[error("No subscriber for tag {0}")]
    UnknownTag(Tag),

    /// Address could not be parsed or resolved.
    #[error("Connect error: {0}")]
    Connect(String),

    /// Command issued before the handshake finished.
    #[error("Session is not connected")]
    NotConnected,

    /// Session task has stopped.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Outbound command queue is full.
    #[error("Outbound command queue is full")]
    Backpressure,

    /// Tag is not exactly four ASCII characters.
    #[error("Invalid tag: {0:?}")]
    InvalidTag(String),

    /// Setter argument does not fit its wire field.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl AtemError {
    /// Whether this error ends the session.
    ///
    /// Decode-time errors only discard the offending datagram or record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AtemError::Transport(_) | AtemError::ConnectionClosed)
    }
}

/// Result type alias using AtemError.
pub type Result<T> = std::result::Result<T, AtemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(AtemError::Transport(io).is_fatal());
        assert!(AtemError::ConnectionClosed.is_fatal());
        assert!(!AtemError::MalformedRecord("short".into()).is_fatal());
        assert!(!AtemError::TruncatedHeader { len: 3 }.is_fatal());
        assert!(!AtemError::NotConnected.is_fatal());
    }

    #[test]
    fn test_display_messages() {
        let err = AtemError::TruncatedHeader { len: 5 };
        assert_eq!(err.to_string(), "Truncated header: 5 bytes, need 12");

        let err = AtemError::UnknownTag(Tag::new(*b"Zzzz"));
        assert!(err.to_string().contains("Zzzz"));
    }
}
