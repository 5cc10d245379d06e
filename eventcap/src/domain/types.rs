//! Domain types providing compile-time safety and self-documentation
//!
//! Newtype wrappers keep buffer names and raw nanosecond counts from being
//! mixed up with unrelated strings and integers in function signatures.

use std::fmt;

/// Name of a registered ring buffer
///
/// Buffers are registered once at startup under a `BufferId`; execution
/// units resolve their buffer by this name when their context is initialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(String);

impl BufferId {
    /// Name of the buffer used when no explicit destination is configured
    pub const DEFAULT: &'static str = "default";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The default destination
    #[must_use]
    pub fn default_buffer() -> Self {
        Self::new(Self::DEFAULT)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer:{}", self.0)
    }
}

impl From<&str> for BufferId {
    fn from(s: &str) -> Self {
        BufferId::new(s)
    }
}

impl From<String> for BufferId {
    fn from(s: String) -> Self {
        BufferId(s)
    }
}

/// Duration in nanoseconds
///
/// Used for reported call durations and for human-readable statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct DurationNs(pub u64);

impl DurationNs {
    /// Convert to milliseconds (f64)
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn as_millis(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Convert to seconds (f64)
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }
}

impl From<std::time::Duration> for DurationNs {
    fn from(d: std::time::Duration) -> Self {
        DurationNs(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for DurationNs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.as_millis();
        if ms >= 1000.0 {
            write!(f, "{:.2}s", self.as_seconds())
        } else {
            write!(f, "{ms:.2}ms")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_id_display() {
        assert_eq!(BufferId::new("web").to_string(), "buffer:web");
        assert_eq!(BufferId::default_buffer().as_str(), "default");
    }

    #[test]
    fn test_duration_conversions() {
        let dur = DurationNs(5_000_000); // 5 milliseconds
        assert_eq!(dur.as_millis(), 5.0);
        assert_eq!(dur.as_seconds(), 0.005);
    }

    #[test]
    fn test_duration_display() {
        assert_eq!(DurationNs(5_000_000).to_string(), "5.00ms");
        assert_eq!(DurationNs(1_500_000_000).to_string(), "1.50s");
    }

    #[test]
    fn test_duration_from_std() {
        let dur = DurationNs::from(std::time::Duration::from_micros(1500));
        assert_eq!(dur.0, 1_500_000);
    }
}
