//! Session tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::messages::limits;

/// Configuration for a replication session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to wait for the peer's Hello.
    #[serde(with = "millis")]
    pub handshake_timeout: Duration,
    /// Range requests outstanding at once.
    pub max_in_flight_ranges: usize,
    /// Received bytes not yet durably stored before new requests pause.
    pub max_buffered_bytes: usize,
    /// Entries per Entries or Push message.
    pub batch_size: usize,
    /// Entries asked for in one request.
    pub max_range_len: u64,
    /// Times one log's stream is restarted before the session gives up on it.
    pub max_stream_retries: u32,
    /// Capacity of the session's internal queues.
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            max_in_flight_ranges: 4,
            max_buffered_bytes: 4 * 1024 * 1024,
            batch_size: 64,
            max_range_len: 1024,
            max_stream_retries: 3,
            channel_capacity: 64,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        let zero = |name: &str| -> Result<()> {
            Err(SyncError::InvalidConfig(format!("{} must be positive", name)))
        };

        if self.handshake_timeout.is_zero() {
            return zero("handshake_timeout");
        }
        if self.max_in_flight_ranges == 0 {
            return zero("max_in_flight_ranges");
        }
        if self.max_buffered_bytes == 0 {
            return zero("max_buffered_bytes");
        }
        if self.batch_size == 0 {
            return zero("batch_size");
        }
        if self.max_range_len == 0 {
            return zero("max_range_len");
        }
        if self.channel_capacity == 0 {
            return zero("channel_capacity");
        }
        if self.batch_size > limits::MAX_ENTRIES_PER_MESSAGE {
            return Err(SyncError::InvalidConfig(format!(
                "batch_size {} exceeds {}",
                self.batch_size,
                limits::MAX_ENTRIES_PER_MESSAGE
            )));
        }
        Ok(())
    }
}

/// Durations as integer milliseconds.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.max_buffered_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let config = SessionConfig {
            max_in_flight_ranges: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        let config = SessionConfig {
            batch_size: limits::MAX_ENTRIES_PER_MESSAGE + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
