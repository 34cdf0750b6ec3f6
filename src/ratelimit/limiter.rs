//! Store-backed rate limiter guard.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::backend::AdmissionGuard;
use super::clock::{Clock, SystemClock};
use super::policy::LimitPolicy;
use super::window::WindowKey;
use crate::store::{CounterStore, StoreError};

/// Default bound on a single store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(50);
/// Default prefix for counter store keys.
pub const DEFAULT_KEY_PREFIX: &str = "rlimiter:";

/// Outcome of a single admission check. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u64,
    /// The limit that was applied
    pub limit: u64,
    /// How long a denied caller should wait; zero when allowed
    pub retry_after: Duration,
    /// Time until the current window ends
    pub reset_after: Duration,
    /// Set when the store could not be consulted and the guard failed open
    pub degraded: bool,
}

impl Decision {
    /// Decide from the post-increment count of a window.
    pub fn from_count(count: u64, policy: &LimitPolicy, reset_after: Duration) -> Self {
        let allowed = count <= policy.limit();
        Self {
            allowed,
            remaining: policy.limit().saturating_sub(count),
            limit: policy.limit(),
            retry_after: if allowed { Duration::ZERO } else { reset_after },
            reset_after,
            degraded: false,
        }
    }

    /// Admit without enforcement because the store was unavailable.
    pub fn fail_open(policy: &LimitPolicy, reset_after: Duration) -> Self {
        Self {
            allowed: true,
            remaining: policy.limit(),
            limit: policy.limit(),
            retry_after: Duration::ZERO,
            reset_after,
            degraded: true,
        }
    }
}

/// Fixed-window rate limiter over an external counter store.
///
/// The limiter holds no counts and no locks. Concurrent checks for the same
/// key serialize only at the store's atomic increment, so one instance can be
/// shared by any number of tasks, and any number of processes can share the
/// store.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    key_prefix: String,
    fail_open_total: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter over `store` with the system clock and default settings.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock::new()),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            fail_open_total: AtomicU64::new(0),
        }
    }

    /// Use a different clock for window computation.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound each check's store interaction by `store_timeout`.
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Prefix every counter key with `prefix`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Number of checks admitted because the store was unavailable.
    pub fn fail_open_total(&self) -> u64 {
        self.fail_open_total.load(Ordering::Relaxed)
    }

    /// Charge one request against `client_key` under `policy`.
    pub async fn check(&self, client_key: &str, policy: &LimitPolicy) -> Decision {
        let now = self.clock.now();
        let window = WindowKey::locate(&self.key_prefix, client_key, policy, now);
        let reset_after = window.resets_in(now);

        trace!(
            key = %window,
            limit = policy.limit(),
            "Checking rate limit"
        );

        let count = match timeout(self.store_timeout, self.charge(&window, policy)).await {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                return self.fail_open(&window, policy, reset_after, &e.to_string());
            }
            Err(_) => {
                let reason = format!("no reply within {:?}", self.store_timeout);
                return self.fail_open(&window, policy, reset_after, &reason);
            }
        };

        let decision = Decision::from_count(count, policy, reset_after);
        if !decision.allowed {
            debug!(
                key = %window,
                count = count,
                limit = policy.limit(),
                retry_after_ms = decision.retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Increment the window counter, attaching an expiry to a fresh record.
    ///
    /// The increment happens before any comparison, so the count a denied
    /// request observes already includes itself.
    ///
    /// The store call runs on its own task. When `check` stops waiting after
    /// `store_timeout`, the task keeps going, so an increment that reached the
    /// store is never cut off before its expiry is written.
    async fn charge(&self, window: &WindowKey, policy: &LimitPolicy) -> Result<u64, StoreError> {
        let store = Arc::clone(&self.store);
        let key = window.key.clone();
        let ttl = policy.period();

        let task = tokio::spawn(async move {
            // Past one period the record belongs to a finished window.
            match timeout(ttl, store.increment_with_expiry(&key, ttl)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(key = %key, "Store call abandoned after one window period");
                    Err(StoreError::Unavailable(format!("no reply within {:?}", ttl)))
                }
            }
        });

        task.await
            .map_err(|e| StoreError::Unavailable(format!("charge task failed: {}", e)))?
    }

    fn fail_open(
        &self,
        window: &WindowKey,
        policy: &LimitPolicy,
        reset_after: Duration,
        reason: &str,
    ) -> Decision {
        let total = self.fail_open_total.fetch_add(1, Ordering::Relaxed) + 1;

        warn!(
            target: "rlimiter::fail_open",
            key = %window,
            reason = %reason,
            fail_open_total = total,
            "Counter store unavailable, admitting request"
        );

        Decision::fail_open(policy, reset_after)
    }
}

#[async_trait]
impl AdmissionGuard for RateLimiter {
    async fn check(&self, client_key: &str, policy: &LimitPolicy) -> Decision {
        RateLimiter::check(self, client_key, policy).await
    }
}
