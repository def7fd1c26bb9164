//! Redis-backed counter store shared by every process of a deployment.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use std::time::Duration;
use tracing::info;

use super::store::{CounterSnapshot, CounterStore, StoreError};

/// INCR, PEXPIRE on the first hit, then PTTL, as one server-side step.
///
/// Running all three in a script keeps a counter from being left without
/// an expiry and returns the count and TTL of the same increment.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
return {count, ttl}
"#;

/// Counter store backed by a Redis server.
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisCounterStore {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        let conn = ConnectionManager::new(client).await.map_err(map_redis_error)?;
        info!(url = %url, "Connected to Redis counter store");

        Ok(Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_and_get(&self, key: &str, expiry: Duration) -> Result<CounterSnapshot, StoreError> {
        let mut conn = self.conn.clone();
        // PEXPIRE rejects zero; the smallest meaningful expiry is 1ms.
        let expiry_ms = (expiry.as_millis() as u64).max(1);

        let (count, ttl_ms): (u64, i64) = self
            .script
            .key(key)
            .arg(expiry_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        if count == 0 {
            return Err(StoreError::Protocol(format!("INCR on {} returned zero", key)));
        }

        Ok(CounterSnapshot {
            count,
            // -1 (no expiry) cannot happen after the script; treat it as expired.
            ttl: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Protocol(err.to_string())
    }
}
