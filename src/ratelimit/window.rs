//! Fixed time windows and the clocks that place requests in them.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Source of wall-clock time for window bucketing.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same time, so a store and a limiter built from clones
/// of one `ManualClock` always agree on "now".
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::milliseconds(by.as_millis() as i64);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// A fixed window aligned to the Unix epoch.
///
/// Every instant belongs to exactly one bucket, identified by the bucket's
/// start in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    length: Duration,
}

impl Window {
    pub fn new(length: Duration) -> Self {
        Self { length }
    }

    /// Get the length of this window.
    pub fn length(&self) -> Duration {
        self.length
    }

    fn length_ms(&self) -> i64 {
        (self.length.as_millis() as i64).max(1)
    }

    /// Start of the bucket containing `now`, in epoch milliseconds.
    pub fn bucket_start(&self, now: DateTime<Utc>) -> i64 {
        let now_ms = now.timestamp_millis();
        now_ms - now_ms.rem_euclid(self.length_ms())
    }

    /// Time left until the bucket containing `now` closes.
    pub fn reset_after(&self, now: DateTime<Utc>) -> Duration {
        let bucket_end = self.bucket_start(now) + self.length_ms();
        let left = bucket_end - now.timestamp_millis();
        Duration::from_millis(left.max(0) as u64)
    }
}
