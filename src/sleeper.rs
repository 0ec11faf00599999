//! Abstraction for the retry protocol's wait.
//!
//! The wait until a window resets is the only suspension point in the crate.
//! Injecting a [`Sleeper`] keeps retry tests fast and deterministic.

use crate::clock::ManualClock;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Abstraction for sleeping/waiting.
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Production sleeper using the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test sleeper that records each wait and advances a [`ManualClock`] by the
/// slept duration instead of actually sleeping.
///
/// Window resets are clock-driven, so a test double that skips the sleep but
/// leaves the clock alone would re-check the same window forever; this one
/// makes the wait observable while letting the window roll over.
#[derive(Debug, Clone)]
pub struct ManualSleeper {
    clock: ManualClock,
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl ManualSleeper {
    pub fn new(clock: ManualClock) -> Self {
        Self { clock, calls: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Durations passed to `sleep`, in call order.
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().unwrap().clone()
    }
}

impl Sleeper for ManualSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        self.calls.lock().unwrap().push(duration);
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.clock.advance(millis);
        Box::pin(async {})
    }
}
