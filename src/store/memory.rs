//! In-process counter store.
//!
//! Honors the same contract as the Redis store but only within one process,
//! which makes it suitable for development and tests. Each key is mutated
//! while holding its dashmap shard lock, so increments are atomic.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{CounterStore, StoreError};
use crate::ratelimit::{Clock, SystemClock};

/// A window record held in memory.
#[derive(Debug, Clone, Copy)]
struct Slot {
    count: u64,
    /// Expiry as time since the epoch, if one was attached
    expires_at: Option<Duration>,
}

impl Slot {
    fn fresh() -> Self {
        Self {
            count: 0,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Duration) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Counter store backed by a concurrent hash map.
#[derive(Debug)]
pub struct MemoryCounterStore {
    slots: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    /// Create a store that expires records against the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a store that expires records against the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
        }
    }

    /// Current value of a live record.
    pub fn get(&self, key: &str) -> Option<u64> {
        let now = self.clock.now();
        self.slots
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.count)
    }

    /// Remaining lifetime of a live record that carries an expiry.
    pub fn time_to_live(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.slots
            .get(key)
            .and_then(|slot| slot.expires_at)
            .and_then(|at| at.checked_sub(now))
            .filter(|left| !left.is_zero())
    }

    /// Drop every record whose expiry has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.slots.len())
    }

    /// Number of records currently held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCounterStore {
    /// Increment a record under its shard lock, attaching `ttl` if it has none.
    fn bump(&self, key: &str, ttl: Option<Duration>) -> u64 {
        let now = self.clock.now();
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(Slot::fresh);

        // An expired record behaves as if the store already evicted it.
        if slot.is_expired(now) {
            *slot = Slot::fresh();
        }

        slot.count += 1;
        if let Some(ttl) = ttl {
            if slot.expires_at.is_none() {
                slot.expires_at = Some(now + ttl);
            }
        }
        slot.count
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment_and_get(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.bump(key, None))
    }

    async fn set_expiry_if_absent(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        if let Some(mut slot) = self.slots.get_mut(key) {
            if slot.expires_at.is_none() {
                slot.expires_at = Some(now + ttl);
            }
        }
        Ok(())
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        Ok(self.bump(key, Some(ttl)))
    }
}
