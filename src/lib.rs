#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # gatekeep
//!
//! Fixed-window admission control for async Rust.
//!
//! ## Features
//!
//! - **Fixed windows** aligned to wall-clock multiples of the window length
//! - **Check/record separation**: peek at admission without consuming a slot
//! - **Bounded wait-and-retry** that sleeps until the window resets instead of
//!   failing immediately
//! - **Pluggable counter stores** via the [`CounterStore`] trait (in-memory
//!   backend included; external key-value backends slot in behind the trait)
//! - **Tower middleware** for dropping admission control in front of a service
//!
//! ## Quick Start
//!
//! ```rust
//! use gatekeep::{InMemoryCounterStore, RateLimitConfig, RateLimiter};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = RateLimiter::new(InMemoryCounterStore::new());
//!     let config = RateLimitConfig::new(100, Duration::from_secs(60));
//!
//!     let result = limiter.check(&config).await.expect("store is infallible");
//!     if result.allowed {
//!         limiter.record_hit(&config).await.expect("store is infallible");
//!         // do the work
//!     }
//! }
//! ```
//!
//! Denied checks carry a [`RateLimitResult::retry`] capability that waits out
//! the window (up to `max_retries` times) and re-checks admission. Retry never
//! records a hit; the caller records one once admission is confirmed.

pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod middleware;
pub mod sleeper;
pub mod store;
pub mod window;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RateLimitConfig;
pub use error::{ConfigError, RateLimitError};
pub use limiter::{RateLimitResult, RateLimiter};
pub use middleware::{AdmissionError, AdmissionLayer, AdmissionService};
pub use sleeper::{ManualSleeper, Sleeper, TokioSleeper};
pub use store::{CounterStore, InMemoryCounterStore};
pub use window::Window;
