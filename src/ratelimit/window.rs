//! Fixed window key derivation.
//!
//! Time is cut into non-overlapping buckets of `period` aligned to the Unix
//! epoch. Every request for the same client and scope inside one bucket maps
//! to the same counter key. A burst straddling the boundary between two
//! adjacent buckets can be admitted up to `2 × limit` times; that is the
//! accepted cost of an O(1) counter over a sliding log.

use std::fmt;
use std::time::Duration;

use super::policy::LimitPolicy;

/// The fixed window a request falls into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// Counter store key: `{prefix}{scope}|{client}|{period_ms}|{index}`
    pub key: String,
    /// Window number since the epoch (`now_ms / period_ms`)
    pub index: u64,
    /// When this window started
    pub start: Duration,
    /// When the next window starts
    pub end: Duration,
}

impl WindowKey {
    /// Locate the window containing `now` for a client under a policy.
    pub fn locate(prefix: &str, client_key: &str, policy: &LimitPolicy, now: Duration) -> Self {
        let period_ms = policy.period_millis();
        let now_ms = now.as_millis() as u64;
        let index = now_ms / period_ms;
        let start_ms = index * period_ms;

        // `|` keeps the period in the key so policies that differ only in
        // period never collide.
        let key = format!(
            "{}{}|{}|{}|{}",
            prefix,
            policy.scope(),
            client_key,
            period_ms,
            index
        );

        Self {
            key,
            index,
            start: Duration::from_millis(start_ms),
            end: Duration::from_millis(start_ms + period_ms),
        }
    }

    /// Time remaining until the window boundary.
    pub fn resets_in(&self, now: Duration) -> Duration {
        self.end.saturating_sub(now)
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}
