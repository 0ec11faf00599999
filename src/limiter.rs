//! Admission decisions and the bounded wait-and-retry protocol.
//!
//! Semantics:
//! - `check` is read-only with respect to the counter; `record_hit` is the
//!   explicit, separate step that consumes a slot. A caller can check
//!   admission and decide not to proceed without spending anything.
//! - A denied [`RateLimitResult`] carries a [`retry`](RateLimitResult::retry)
//!   capability: sleep until the window resets, re-check, repeat up to
//!   `max_retries` times. Retry is an iterative loop with one suspension
//!   point per iteration; dropping the future between iterations cancels it
//!   without touching the store.
//! - Each retry attempt re-runs a full check and re-anchors to the freshly
//!   computed window, so an attempt near a boundary follows the window that
//!   actually denies it.
//!
//! Invariants:
//! - A retry chain sleeps at most `max_retries` times.
//! - Retry never records a hit; the caller records one once admission is
//!   confirmed.
//! - Store failures propagate unchanged; they are never mapped to an
//!   admission outcome.

use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::error::RateLimitError;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::store::CounterStore;
use crate::window::Window;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Fixed-window rate limiter over a pluggable [`CounterStore`].
///
/// Cheap to clone; clones share the store, clock, and sleeper.
pub struct RateLimiter<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl<S> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            sleeper: self.sleeper.clone(),
        }
    }
}

impl<S> std::fmt::Debug for RateLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("clock", &self.clock)
            .field("sleeper", &self.sleeper)
            .finish_non_exhaustive()
    }
}

impl<S> RateLimiter<S>
where
    S: CounterStore,
{
    /// Create a limiter over `store` with the wall clock and tokio sleeper.
    pub fn new(store: S) -> Self {
        Self { store: Arc::new(store), clock: Arc::new(SystemClock), sleeper: Arc::new(TokioSleeper) }
    }

    /// Replace the clock. Windows are bucketed against this clock.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Replace the sleeper used by the retry wait.
    pub fn with_sleeper<P>(mut self, sleeper: P) -> Self
    where
        P: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    fn current_window(&self, config: &RateLimitConfig) -> Window {
        Window::containing(self.clock.now_millis(), config.window_millis())
    }

    /// Check admission for the current window without consuming a slot.
    pub async fn check(
        &self,
        config: &RateLimitConfig,
    ) -> Result<RateLimitResult<'_, S>, RateLimitError<S::Error>> {
        config.validate()?;

        let window = self.current_window(config);
        let key = window.key(&config.key_prefix);
        let count = self.store.read(&key).await.map_err(RateLimitError::Store)?;

        let allowed = count < u64::from(config.max_requests);
        let remaining =
            config.max_requests.saturating_sub(u32::try_from(count).unwrap_or(u32::MAX));

        trace!(key = %key, total_hits = count, allowed, "admission check");
        if !allowed {
            debug!(
                key = %key,
                total_hits = count,
                reset_at_millis = window.reset_millis(),
                "admission denied"
            );
        }

        Ok(RateLimitResult {
            allowed,
            remaining,
            reset_at_millis: window.reset_millis(),
            total_hits: count,
            limiter: self,
            config: config.clone(),
        })
    }

    /// Record one hit against the current window.
    ///
    /// Each call counts as one hit; callers invoke this at most once per
    /// logical request actually performed.
    pub async fn record_hit(
        &self,
        config: &RateLimitConfig,
    ) -> Result<(), RateLimitError<S::Error>> {
        config.validate()?;

        let window = self.current_window(config);
        let key = window.key(&config.key_prefix);
        let count =
            self.store.increment(&key, config.window).await.map_err(RateLimitError::Store)?;

        trace!(key = %key, total_hits = count, "recorded hit");
        Ok(())
    }
}

/// Outcome of one admission check, bound to the limiter and config that
/// produced it. Not persisted anywhere.
pub struct RateLimitResult<'a, S: CounterStore> {
    /// Whether a new unit of work may proceed under the current count.
    pub allowed: bool,
    /// Slots left in the window: `max(0, max_requests - total_hits)`.
    pub remaining: u32,
    /// Wall-clock timestamp (epoch millis) at which the window resets.
    pub reset_at_millis: u64,
    /// Count observed at check time.
    pub total_hits: u64,
    limiter: &'a RateLimiter<S>,
    config: RateLimitConfig,
}

impl<S: CounterStore> std::fmt::Debug for RateLimitResult<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitResult")
            .field("allowed", &self.allowed)
            .field("remaining", &self.remaining)
            .field("reset_at_millis", &self.reset_at_millis)
            .field("total_hits", &self.total_hits)
            .finish_non_exhaustive()
    }
}

impl<S: CounterStore> RateLimitResult<'_, S> {
    /// How long until this result's window resets; zero if it already has.
    ///
    /// Suitable for a `Retry-After` header on a rejection response.
    pub fn retry_after(&self) -> Duration {
        Duration::from_millis(self.reset_at_millis.saturating_sub(self.limiter.clock.now_millis()))
    }

    /// Wait out the window and re-check admission, at most `max_retries`
    /// times.
    ///
    /// Returns `Ok(true)` once a re-check admits (immediately, without
    /// waiting, if the originating check was already allowed) and `Ok(false)`
    /// when the ceiling is exhausted. `Ok(false)` means "denied after
    /// waiting", which is distinct from a store failure.
    pub async fn retry(&self) -> Result<bool, RateLimitError<S::Error>> {
        if self.allowed {
            return Ok(true);
        }

        let mut reset_at_millis = self.reset_at_millis;
        for attempt in 1..=self.config.max_retries {
            let wait = reset_at_millis.saturating_sub(self.limiter.clock.now_millis());
            if wait > 0 {
                trace!(attempt, wait_millis = wait, "waiting for window reset");
                self.limiter.sleeper.sleep(Duration::from_millis(wait)).await;
            }

            let recheck = self.limiter.check(&self.config).await?;
            if recheck.allowed {
                debug!(attempt, "admission granted after waiting");
                return Ok(true);
            }
            // Re-anchor to the window that denied this attempt.
            reset_at_millis = recheck.reset_at_millis;
        }

        debug!(max_retries = self.config.max_retries, "retry exhausted");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ConfigError;
    use crate::sleeper::ManualSleeper;
    use crate::store::InMemoryCounterStore;
    use async_trait::async_trait;

    fn test_limiter(
        start_millis: u64,
    ) -> (RateLimiter<InMemoryCounterStore>, ManualClock, ManualSleeper) {
        let clock = ManualClock::starting_at(start_millis);
        let sleeper = ManualSleeper::new(clock.clone());
        let limiter = RateLimiter::new(InMemoryCounterStore::new())
            .with_clock(clock.clone())
            .with_sleeper(sleeper.clone());
        (limiter, clock, sleeper)
    }

    #[tokio::test]
    async fn fresh_window_allows_with_full_remaining() {
        let (limiter, _, _) = test_limiter(10_500);
        let config = RateLimitConfig::new(3, Duration::from_secs(1));

        let result = limiter.check(&config).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 3);
        assert_eq!(result.total_hits, 0);
        assert_eq!(result.reset_at_millis, 11_000);
    }

    #[tokio::test]
    async fn check_does_not_consume_a_slot() {
        let (limiter, _, _) = test_limiter(0);
        let config = RateLimitConfig::new(1, Duration::from_secs(1));

        for _ in 0..5 {
            let result = limiter.check(&config).await.unwrap();
            assert!(result.allowed);
            assert_eq!(result.total_hits, 0);
        }
    }

    #[tokio::test]
    async fn recorded_hits_reduce_remaining_until_denied() {
        let (limiter, _, _) = test_limiter(0);
        let config = RateLimitConfig::new(2, Duration::from_secs(1));

        limiter.record_hit(&config).await.unwrap();
        let result = limiter.check(&config).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 1);
        assert_eq!(result.total_hits, 1);

        limiter.record_hit(&config).await.unwrap();
        let result = limiter.check(&config).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.total_hits, 2);
    }

    #[tokio::test]
    async fn checks_within_one_window_agree_on_reset() {
        let (limiter, clock, _) = test_limiter(10_000);
        let config = RateLimitConfig::new(5, Duration::from_secs(5));

        let first = limiter.check(&config).await.unwrap();
        clock.advance(4_999);
        let second = limiter.check(&config).await.unwrap();
        assert_eq!(first.reset_at_millis, second.reset_at_millis);
        assert_eq!(first.reset_at_millis, 15_000);
    }

    #[tokio::test]
    async fn counts_reset_in_the_next_window() {
        let (limiter, clock, _) = test_limiter(0);
        let config = RateLimitConfig::new(2, Duration::from_secs(5));

        limiter.record_hit(&config).await.unwrap();
        limiter.record_hit(&config).await.unwrap();
        assert!(!limiter.check(&config).await.unwrap().allowed);

        clock.advance(5_000);
        let result = limiter.check(&config).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 2);
        assert_eq!(result.total_hits, 0);
    }

    #[tokio::test]
    async fn key_prefixes_namespace_counters() {
        let (limiter, _, _) = test_limiter(0);
        let chat = RateLimitConfig::new(1, Duration::from_secs(1)).with_key_prefix("chat");
        let search = RateLimitConfig::new(1, Duration::from_secs(1)).with_key_prefix("search");

        limiter.record_hit(&chat).await.unwrap();
        assert!(!limiter.check(&chat).await.unwrap().allowed);
        assert!(limiter.check(&search).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn zero_max_requests_always_denies() {
        let (limiter, clock, _) = test_limiter(0);
        let config = RateLimitConfig::new(0, Duration::from_secs(1));

        let result = limiter.check(&config).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);

        clock.advance(10_000);
        assert!(!limiter.check(&config).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn zero_window_is_rejected_at_call_time() {
        let (limiter, _, _) = test_limiter(0);
        let config = RateLimitConfig::new(1, Duration::ZERO);

        let err = limiter.check(&config).await.unwrap_err();
        assert!(matches!(err, RateLimitError::Config(ConfigError::ZeroWindow)));

        let err = limiter.record_hit(&config).await.unwrap_err();
        assert!(matches!(err, RateLimitError::Config(ConfigError::ZeroWindow)));
    }

    #[tokio::test]
    async fn sub_millisecond_window_is_rejected_not_bucketed() {
        let (limiter, _, _) = test_limiter(0);
        let config = RateLimitConfig::new(1, Duration::from_micros(500));

        let err = limiter.check(&config).await.unwrap_err();
        assert!(matches!(err, RateLimitError::Config(ConfigError::ZeroWindow)));

        let err = limiter.record_hit(&config).await.unwrap_err();
        assert!(matches!(err, RateLimitError::Config(ConfigError::ZeroWindow)));
    }

    #[tokio::test]
    async fn retry_on_allowed_result_is_a_no_op() {
        let (limiter, _, sleeper) = test_limiter(0);
        let config = RateLimitConfig::new(1, Duration::from_secs(1));

        let result = limiter.check(&config).await.unwrap();
        assert!(result.retry().await.unwrap());
        assert!(sleeper.calls().is_empty(), "allowed result must not wait");
    }

    #[tokio::test]
    async fn retry_waits_until_reset_then_admits() {
        let (limiter, _, sleeper) = test_limiter(1_700);
        let config = RateLimitConfig::new(1, Duration::from_millis(500));

        limiter.record_hit(&config).await.unwrap();
        let result = limiter.check(&config).await.unwrap();
        assert!(!result.allowed);

        assert!(result.retry().await.unwrap());
        // Window [1500, 2000): one sleep of exactly the remaining 300ms.
        assert_eq!(sleeper.calls(), vec![Duration::from_millis(300)]);
    }

    #[tokio::test]
    async fn retry_exhausts_after_max_retries_waits() {
        let (limiter, _, sleeper) = test_limiter(0);
        let config = RateLimitConfig::new(0, Duration::from_secs(1)).with_max_retries(2);

        let result = limiter.check(&config).await.unwrap();
        assert!(!result.retry().await.unwrap());
        assert_eq!(sleeper.calls().len(), 2, "ceiling bounds the number of waits");
    }

    #[tokio::test]
    async fn retry_with_zero_ceiling_fails_without_waiting() {
        let (limiter, _, sleeper) = test_limiter(0);
        let config = RateLimitConfig::new(0, Duration::from_secs(1)).with_max_retries(0);

        let result = limiter.check(&config).await.unwrap();
        assert!(!result.retry().await.unwrap());
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn retry_reanchors_to_each_denying_window() {
        let (limiter, _, sleeper) = test_limiter(250);
        let config = RateLimitConfig::new(0, Duration::from_secs(1)).with_max_retries(3);

        let result = limiter.check(&config).await.unwrap();
        assert!(!result.retry().await.unwrap());
        // First wait covers the partial window; later waits are whole windows
        // anchored to each fresh denial.
        assert_eq!(
            sleeper.calls(),
            vec![
                Duration::from_millis(750),
                Duration::from_millis(1_000),
                Duration::from_millis(1_000),
            ]
        );
    }

    #[derive(Debug, Clone, Copy)]
    struct DownStore;

    #[derive(Debug, thiserror::Error)]
    #[error("backend unreachable")]
    struct StoreDown;

    #[async_trait]
    impl CounterStore for DownStore {
        type Error = StoreDown;

        async fn increment(&self, _key: &str, _ttl: Duration) -> Result<u64, Self::Error> {
            Err(StoreDown)
        }

        async fn read(&self, _key: &str) -> Result<u64, Self::Error> {
            Err(StoreDown)
        }
    }

    #[tokio::test]
    async fn store_failures_propagate_unchanged() {
        let limiter = RateLimiter::new(DownStore).with_clock(ManualClock::starting_at(0));
        let config = RateLimitConfig::new(1, Duration::from_secs(1));

        let err = limiter.check(&config).await.unwrap_err();
        assert!(err.is_store());

        let err = limiter.record_hit(&config).await.unwrap_err();
        assert!(matches!(err, RateLimitError::Store(StoreDown)));
    }

    #[tokio::test]
    async fn retry_surfaces_store_failure_mid_chain() {
        // Denied first check against a healthy store, then the store goes
        // down before the re-check: the error must surface, not a decision.
        #[derive(Debug, Default)]
        struct FlakyStore {
            reads: std::sync::atomic::AtomicUsize,
        }

        #[async_trait]
        impl CounterStore for FlakyStore {
            type Error = StoreDown;

            async fn increment(&self, _key: &str, _ttl: Duration) -> Result<u64, Self::Error> {
                Ok(1)
            }

            async fn read(&self, _key: &str) -> Result<u64, Self::Error> {
                match self.reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst) {
                    0 => Ok(1), // denied under max_requests = 1
                    _ => Err(StoreDown),
                }
            }
        }

        let clock = ManualClock::starting_at(0);
        let limiter = RateLimiter::new(FlakyStore::default())
            .with_clock(clock.clone())
            .with_sleeper(ManualSleeper::new(clock.clone()));
        let config = RateLimitConfig::new(1, Duration::from_secs(1));

        let result = limiter.check(&config).await.unwrap();
        assert!(!result.allowed);
        assert!(result.retry().await.unwrap_err().is_store());
    }
}
