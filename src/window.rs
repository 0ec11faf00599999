//! Fixed-window bucketing math.
//!
//! Windows are aligned to multiples of the window length since the epoch:
//! `start = floor(now / length) * length`. Two calls inside the same aligned
//! interval map to the same window and therefore to the same counter key.

/// One fixed time window, identified by its aligned start timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    start_millis: u64,
    length_millis: u64,
}

impl Window {
    /// The window containing `now_millis` for the given length.
    ///
    /// `length_millis` must be non-zero; callers validate via
    /// [`RateLimitConfig::validate`](crate::RateLimitConfig::validate) before
    /// reaching window math.
    pub fn containing(now_millis: u64, length_millis: u64) -> Self {
        debug_assert!(length_millis > 0, "window length validated before bucketing");
        let start_millis = (now_millis / length_millis) * length_millis;
        Self { start_millis, length_millis }
    }

    /// Aligned start of this window (epoch millis).
    pub fn start_millis(&self) -> u64 {
        self.start_millis
    }

    /// Timestamp at which this window resets (epoch millis).
    pub fn reset_millis(&self) -> u64 {
        self.start_millis.saturating_add(self.length_millis)
    }

    /// Counter key for this window: `"{prefix}:{start_millis}"`.
    ///
    /// The separator and integer timestamp semantics are part of the key
    /// scheme; stores keyed by other producers of the same scheme stay
    /// compatible.
    pub fn key(&self, prefix: &str) -> String {
        format!("{}:{}", prefix, self.start_millis)
    }
}
