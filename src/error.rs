//! Error types for admission control.
//!
//! A store failure is a distinct outcome from an admission decision: denial
//! is a valid business result, unavailability is not. Store errors bubble
//! unchanged to the caller; there is no allow-on-error fallback. Retry
//! exhaustion is the terminal `Ok(false)` return from
//! [`retry`](crate::RateLimitResult::retry), not an error.

use thiserror::Error;

/// Invalid [`RateLimitConfig`](crate::RateLimitConfig). Raised at call time,
/// never silently clamped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The window length must be greater than zero.
    #[error("window length must be greater than zero")]
    ZeroWindow,
}

/// Unified error for limiter operations, generic over the backend's error.
#[derive(Debug, Error)]
pub enum RateLimitError<E> {
    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The counter store could not complete the operation.
    #[error("counter store unavailable: {0}")]
    Store(#[source] E),
}

impl<E> RateLimitError<E> {
    /// Check if this error is a configuration failure.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Check if this error is a store failure.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Extract the backend error, if any.
    pub fn into_store(self) -> Option<E> {
        match self {
            Self::Store(e) => Some(e),
            Self::Config(_) => None,
        }
    }
}
