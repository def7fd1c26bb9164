//! Rate limiting logic and state management.

mod evaluator;
mod key;
mod limiter;
mod registry;
#[cfg(feature = "redis-store")]
mod redis_store;
mod store;
mod tier;
mod window;

pub use evaluator::{evaluate, AdmissionDecision};
pub use key::CounterKey;
pub use limiter::{CheckOutcome, FailureMode, RateLimiter};
#[cfg(feature = "redis-store")]
pub use redis_store::RedisCounterStore;
pub use registry::{PolicyRegistry, AUTH, GENERAL, STRICT, WEBSOCKET};
pub use store::{connect, CounterSnapshot, CounterStore, InMemoryCounterStore, StoreError};
pub use tier::{KeyRule, PolicyTier, DEFAULT_MESSAGE};
pub use window::{Clock, ManualClock, SystemClock, Window};
