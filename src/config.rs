//! Client configuration.
//!
//! All fields have defaults, so a partial JSON document is enough:
//!
//! ```
//! use atem_client::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{ "port": 9911 }"#).unwrap();
//! assert_eq!(config.port, 9911);
//! assert_eq!(config.bind_address, "0.0.0.0:0");
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{AtemError, Result};
use crate::protocol::MAX_DATAGRAM_SIZE;
use crate::transport::DEFAULT_PORT;
use crate::writer::DEFAULT_COMMAND_QUEUE_CAPACITY;

/// Default capacity of each notification channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Default receive buffer; one byte above the largest datagram.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 2048;

/// Settings for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Device port used when the address has none.
    pub port: u16,
    /// Local address to bind, normally an ephemeral port.
    pub bind_address: String,
    /// Outbound commands that may wait for the session task.
    pub command_queue_capacity: usize,
    /// Buffered notifications per channel before slow listeners lag.
    pub event_capacity: usize,
    /// Bytes read per datagram.
    pub receive_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: "0.0.0.0:0".to_string(),
            command_queue_capacity: DEFAULT_COMMAND_QUEUE_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
        }
    }
}

impl ClientConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.receive_buffer_size < MAX_DATAGRAM_SIZE {
            return Err(AtemError::InvalidValue(format!(
                "receive_buffer_size {} is below the {} byte datagram limit",
                self.receive_buffer_size, MAX_DATAGRAM_SIZE
            )));
        }
        if self.command_queue_capacity == 0 {
            return Err(AtemError::InvalidValue(
                "command_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(AtemError::InvalidValue(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 9910);
        assert_eq!(config.receive_buffer_size, 2048);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = ClientConfig {
            port: 1234,
            bind_address: "127.0.0.1:0".to_string(),
            ..ClientConfig::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(ClientConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            ClientConfig::from_json("{ port: }"),
            Err(AtemError::Config(_))
        ));
    }

    #[test]
    fn test_validation() {
        let small = r#"{ "receive_buffer_size": 512 }"#;
        assert!(matches!(
            ClientConfig::from_json(small),
            Err(AtemError::InvalidValue(_))
        ));

        let zero_queue = r#"{ "command_queue_capacity": 0 }"#;
        assert!(ClientConfig::from_json(zero_queue).is_err());
    }
}
