//! Redis-backed counter store.
//!
//! Window records are plain integer keys:
//! - `INCR` provides the atomic increment-and-get
//! - a small Lua script applies `PEXPIRE` only when the key has no TTL yet
//! - a second script does both in one round trip; this is what the limiter
//!   uses, so an incremented key can never be left without a TTL
//!
//! The connection is established lazily through a shared
//! `ConnectionManager`, so a Redis outage at startup does not stop the
//! service from booting; requests simply fail open until Redis returns.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::fmt;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{CounterStore, StoreError};
use crate::error::{Result, RlimiterError};

/// `PTTL` reports -1 for a key that exists without an expiry and -2 for a
/// missing key; only the former gets a TTL.
const EXPIRE_IF_ABSENT: &str = r#"
if redis.call('PTTL', KEYS[1]) == -1 then
    return redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return 0
"#;

/// Increment, then attach a TTL unless one is already set. Runs atomically on
/// the server, which also repairs a key that lost its expiry.
const INCR_WITH_EXPIRY: &str = r#"
local count = redis.call('INCR', KEYS[1])
if redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Counter store shared by every process pointed at the same Redis.
pub struct RedisCounterStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    expire_if_absent: Script,
    incr_with_expiry: Script,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("connected", &self.connection.initialized())
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Create a store for the given Redis URL (e.g. `redis://127.0.0.1/`).
    ///
    /// Only the URL is validated here; no connection is attempted.
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| RlimiterError::Config(format!("invalid redis url {:?}: {}", url, e)))?;

        info!(url = %url, "Configured Redis counter store");

        Ok(Self {
            client,
            connection: OnceCell::new(),
            expire_if_absent: Script::new(EXPIRE_IF_ABSENT),
            incr_with_expiry: Script::new(INCR_WITH_EXPIRY),
        })
    }

    /// Get a handle to the shared connection, connecting on first use.
    async fn connection(&self) -> std::result::Result<ConnectionManager, StoreError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                debug!("Connecting to Redis");
                ConnectionManager::new(self.client.clone()).await
            })
            .await?;

        // ConnectionManager clones share one multiplexed connection.
        Ok(manager.clone())
    }

    /// Remaining lifetime of a key, or `None` when it is missing or has no expiry.
    pub async fn time_to_live(&self, key: &str) -> std::result::Result<Option<Duration>, StoreError> {
        let mut conn = self.connection().await?;
        let pttl: i64 = conn.pttl(key).await?;

        Ok(u64::try_from(pttl).ok().map(Duration::from_millis))
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_and_get(&self, key: &str) -> std::result::Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let count: u64 = conn.incr(key, 1u64).await?;
        Ok(count)
    }

    async fn set_expiry_if_absent(
        &self,
        key: &str,
        ttl: Duration,
    ) -> std::result::Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let applied: i64 = self
            .expire_if_absent
            .key(key)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;

        debug!(key = %key, ttl_ms = ttl_ms, applied = applied == 1, "Set window expiry");
        Ok(())
    }

    async fn increment_with_expiry(
        &self,
        key: &str,
        ttl: Duration,
    ) -> std::result::Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let count: u64 = self
            .incr_with_expiry
            .key(key)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }
}
