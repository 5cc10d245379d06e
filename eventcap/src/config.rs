//! Runtime configuration
//!
//! The capture core reads these values once, at initialization. Loading them
//! from a file or the environment is the host's job; the struct derives serde
//! `Deserialize` so any format works, and the `eventcap` binary fills it from
//! command-line arguments.

use serde::Deserialize;
use std::time::Duration;

use crate::buffer::OverflowStrategy;
use crate::domain::ConfigError;

/// Default ring buffer capacity (slots)
pub const DEFAULT_BUFFER_CAPACITY: usize = 65_536;

/// Default maximum captured value size, in estimated bytes
pub const DEFAULT_TRUNCATION_LIMIT: usize = 4_096;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Overflow behavior of buffers created from this config
    pub default_overflow_strategy: OverflowStrategy,

    /// Slots per buffer; must be a power of two
    pub buffer_capacity: usize,

    /// Captured values estimated larger than this are summarized
    pub truncation_limit: usize,

    /// Initial `enabled` state of new contexts
    pub default_enabled: bool,

    /// Wait bound for `Block` writers; absent means wait indefinitely
    pub block_timeout_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_overflow_strategy: OverflowStrategy::DropOldest,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            truncation_limit: DEFAULT_TRUNCATION_LIMIT,
            default_enabled: true,
            block_timeout_ms: None,
        }
    }
}

impl RuntimeConfig {
    /// Check the values the core cannot work around
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidCapacity`] for a zero or non-power-of-two capacity
    /// - [`ConfigError::ZeroTruncationLimit`] for a zero truncation limit
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 || !self.buffer_capacity.is_power_of_two() {
            return Err(ConfigError::InvalidCapacity(self.buffer_capacity));
        }
        if self.truncation_limit == 0 {
            return Err(ConfigError::ZeroTruncationLimit);
        }
        Ok(())
    }

    #[must_use]
    pub fn block_timeout(&self) -> Option<Duration> {
        self.block_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.default_enabled);
        assert_eq!(config.block_timeout(), None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = RuntimeConfig { buffer_capacity: 1000, ..RuntimeConfig::default() };
        assert_eq!(config.validate(), Err(ConfigError::InvalidCapacity(1000)));

        let config = RuntimeConfig { truncation_limit: 0, ..RuntimeConfig::default() };
        assert_eq!(config.validate(), Err(ConfigError::ZeroTruncationLimit));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: RuntimeConfig = serde_json::from_str(
            r#"{"default_overflow_strategy": "block", "block_timeout_ms": 250, "default_enabled": false}"#,
        )
        .unwrap();

        assert_eq!(config.default_overflow_strategy, OverflowStrategy::Block);
        assert_eq!(config.block_timeout(), Some(Duration::from_millis(250)));
        assert!(!config.default_enabled);
        assert_eq!(config.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
    }
}
