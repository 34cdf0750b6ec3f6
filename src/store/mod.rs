//! Counter store contract and implementations.
//!
//! The counter store owns every window record. The limiter never caches
//! counts locally; it only asks the store to increment and to attach an
//! expiry, which keeps the limit correct when many processes share a store.
//!
//! A record that was incremented must always end up with an expiry, or it
//! outlives its window forever. `increment_with_expiry` is the operation the
//! limiter uses for that.

mod memory;
mod redis_store;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use self::memory::MemoryCounterStore;
pub use self::redis_store::RedisCounterStore;

/// Errors that can occur talking to a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Atomic counter storage with per-key expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` and return the new value.
    ///
    /// An absent key is created at 1. Concurrent callers never lose updates and
    /// never both observe 1 for the same key.
    async fn increment_and_get(&self, key: &str) -> Result<u64, StoreError>;

    /// Attach `ttl` to `key` unless it already carries an expiry.
    ///
    /// An existing expiry is left untouched; resetting it would stretch a
    /// fixed window into a sliding one.
    async fn set_expiry_if_absent(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Increment `key` and make sure the record carries an expiry.
    ///
    /// A fresh record gets `ttl`; a record that already expires keeps its
    /// deadline. Stores that can do both in one atomic step override this.
    ///
    /// The default issues the two calls in sequence and applies the expiry on
    /// every increment, not just the first, so a record whose first expiry
    /// was lost is repaired by the next charge.
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let count = self.increment_and_get(key).await?;

        if let Err(e) = self.set_expiry_if_absent(key, ttl).await {
            // The count is still valid and the next charge retries the expiry.
            warn!(key = %key, count = count, error = %e, "Failed to set window expiry");
        }

        Ok(count)
    }
}
