//! Per-check rate limit configuration.

use crate::error::ConfigError;
use std::time::Duration;

/// Key prefix used when none is configured.
pub const DEFAULT_KEY_PREFIX: &str = "rate-limit";
/// Number of waited re-checks a denied result performs by default.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Immutable configuration for a single admission check.
///
/// Two checks with the same `key_prefix` and `window` share counters: keys
/// are derived from the prefix and the window start, so the config itself is
/// the namespacing unit. `max_requests = 0` always denies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Namespace for derived window keys.
    pub key_prefix: String,
    /// Maximum number of requests admitted per window.
    pub max_requests: u32,
    /// Window length. Millisecond resolution; must be at least one
    /// millisecond.
    pub window: Duration,
    /// Maximum number of waited re-checks before retry gives up.
    pub max_retries: u32,
}

impl RateLimitConfig {
    /// Create a config with the default key prefix and retry ceiling.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_requests,
            window,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set the key prefix (namespacing).
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the retry ceiling. Zero means a denied result never waits.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Validate the config. A window that is zero at millisecond resolution
    /// (including sub-millisecond durations, which bucketing would floor to
    /// nothing) is a configuration error, not a runtime admission outcome.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_millis() == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        Ok(())
    }

    /// Window length in whole milliseconds, saturating on overflow.
    pub(crate) fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }
}
