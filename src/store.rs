//! Counter storage for window keys.
//!
//! The store holds per-key hit counts and knows nothing about rate-limit
//! semantics. The trait assumes a key-value model with numeric values and a
//! TTL on mutation, so distributed backends (e.g., a redis `INCR` + `EXPIRE`
//! pipeline) slot in behind the same interface as the in-memory map.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Abstract storage interface for per-window hit counts.
///
/// Implementations must be safe under concurrent callers: two concurrent
/// increments on the same key must never lose an update.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Atomically add one to `key`'s count, creating it at 1, and return the
    /// new count. `ttl` is how long the entry stays meaningful; backends use
    /// it to reclaim entries whose window has passed.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, Self::Error>;

    /// Current count for `key` without mutation; 0 if absent or expired.
    async fn read(&self, key: &str) -> Result<u64, Self::Error>;
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u64,
    expires_at: Instant,
}

/// In-memory counter store behind a global lock.
///
/// Expired entries are pruned lazily on each increment, so the map never
/// grows past the set of keys touched within one TTL. Admission decisions
/// never rely on expiry for correctness (a fresh key is derived per window);
/// pruning is housekeeping only.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCounterStore {
    data: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries. Primarily useful for tests.
    pub fn entry_count(&self) -> usize {
        let now = Instant::now();
        let guard = self.data.lock().unwrap();
        guard.values().filter(|e| e.expires_at > now).count()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    type Error = std::convert::Infallible;

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, Self::Error> {
        let now = Instant::now();
        let mut guard = self.data.lock().unwrap();

        guard.retain(|_, entry| entry.expires_at > now);

        let entry = guard
            .entry(key.to_string())
            .or_insert(Entry { count: 0, expires_at: now + ttl });
        entry.count += 1;
        entry.expires_at = now + ttl;
        Ok(entry.count)
    }

    async fn read(&self, key: &str) -> Result<u64, Self::Error> {
        let now = Instant::now();
        let guard = self.data.lock().unwrap();
        Ok(guard
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.count)
            .unwrap_or(0))
    }
}
