//! Counter store interface and the in-memory backend.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::window::{Clock, SystemClock};
use crate::config::{StoreBackend, StoreConfig};

/// Errors raised by a counter store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected store reply: {0}")]
    Protocol(String),
}

/// Counter state returned by a single atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Count after the increment
    pub count: u64,
    /// Time until the counter expires
    pub ttl: Duration,
}

/// Key-value store providing atomic increment-with-expiry.
///
/// Implementations must make the increment and the read of the new count
/// and TTL one atomic step, so concurrent callers never lose updates.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter at `key` and return its new state.
    ///
    /// A missing or expired counter starts at zero and expires `expiry`
    /// after this call.
    async fn increment_and_get(&self, key: &str, expiry: Duration) -> Result<CounterSnapshot, StoreError>;

    /// Short backend name for logging.
    fn backend(&self) -> &'static str;
}

/// Build the counter store described by the configuration.
pub async fn connect(config: &StoreConfig) -> crate::error::Result<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory counter store");
            Ok(Arc::new(InMemoryCounterStore::new()))
        }
        #[cfg(feature = "redis-store")]
        StoreBackend::Redis => {
            let store = super::redis_store::RedisCounterStore::connect(&config.redis_url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis-store"))]
        StoreBackend::Redis => Err(crate::error::TollgateError::Config(
            "redis backend requested but the redis-store feature is disabled".to_string(),
        )),
    }
}

/// Expired entries are swept roughly once per this many increments.
const EVICTION_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u64,
    /// Expiry in epoch milliseconds
    expires_at: i64,
}

/// Process-local counter store.
///
/// Each increment runs under the shard lock of its key, which makes the
/// increment and the returned snapshot atomic.
pub struct InMemoryCounterStore<C: Clock = SystemClock> {
    entries: DashMap<String, Entry>,
    clock: Arc<C>,
    ops: AtomicU64,
}

impl InMemoryCounterStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl Default for InMemoryCounterStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InMemoryCounterStore<C> {
    /// Create a store reading time from the given clock.
    pub fn with_clock(clock: Arc<C>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            ops: AtomicU64::new(0),
        }
    }

    /// Current count at `key`; zero when missing or expired.
    pub fn count(&self, key: &str) -> u64 {
        let now = self.clock.now().timestamp_millis();
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    /// Drop every expired counter. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now().timestamp_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted, "Evicted expired counters");
        }
        evicted
    }

    /// Number of counters held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn maybe_evict_expired(&self) {
        let ops = self.ops.fetch_add(1, Ordering::Relaxed);
        if ops % EVICTION_INTERVAL == EVICTION_INTERVAL - 1 {
            self.evict_expired();
        }
    }
}

#[async_trait]
impl<C: Clock + 'static> CounterStore for InMemoryCounterStore<C> {
    async fn increment_and_get(&self, key: &str, expiry: Duration) -> Result<CounterSnapshot, StoreError> {
        // Must run before taking the entry lock; retain locks every shard.
        self.maybe_evict_expired();

        let now = self.clock.now().timestamp_millis();
        let expires_at = now + expiry.as_millis() as i64;

        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            count: 0,
            expires_at,
        });
        if entry.expires_at <= now {
            *entry = Entry {
                count: 0,
                expires_at,
            };
        }
        entry.count += 1;

        Ok(CounterSnapshot {
            count: entry.count,
            ttl: Duration::from_millis((entry.expires_at - now).max(0) as u64),
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
