//! Behavioral properties of the rate limiter guard over the in-memory store.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rlimiter::ratelimit::{
    AdmissionGuard, Clock, LimitPolicy, ManualClock, RateLimiter, WindowKey, DEFAULT_KEY_PREFIX,
};
use rlimiter::store::{CounterStore, MemoryCounterStore, StoreError};

/// A limiter and store sharing a frozen clock at `start`.
fn setup(start: Duration) -> (Arc<RateLimiter>, Arc<MemoryCounterStore>, ManualClock) {
    let clock = ManualClock::new(start);
    let store = Arc::new(MemoryCounterStore::with_clock(Arc::new(clock.clone())));
    let limiter = RateLimiter::new(store.clone()).with_clock(Arc::new(clock.clone()));
    (Arc::new(limiter), store, clock)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_checks_admit_exactly_limit() {
    let (limiter, store, clock) = setup(Duration::from_secs(600));
    let policy = Arc::new(LimitPolicy::new(20, Duration::from_secs(60)).unwrap());

    let tasks = (0..100).map(|_| {
        let limiter = limiter.clone();
        let policy = policy.clone();
        tokio::spawn(async move { limiter.check("shared", &policy).await })
    });

    let decisions: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let allowed = decisions.iter().filter(|d| d.allowed).count();
    assert_eq!(allowed, 20);
    assert_eq!(decisions.len() - allowed, 80);

    // Every check was charged, allowed or not.
    let window = WindowKey::locate(DEFAULT_KEY_PREFIX, "shared", &policy, clock.now());
    assert_eq!(store.get(&window.key), Some(100));
}

#[tokio::test]
async fn test_catalog_scenario_300_per_30s() {
    // Start on a window boundary so t = 31s lands in the next window.
    let start = Duration::from_secs(30 * 1_000);
    let (limiter, _, clock) = setup(start);
    let policy = LimitPolicy::new(300, Duration::from_secs(30)).unwrap();

    let mut allowed = 0;
    let mut denied = Vec::new();
    for i in 0..305u64 {
        clock.set(start + Duration::from_millis(i * 90));
        let decision = limiter.check("10.0.0.7", &policy).await;
        if decision.allowed {
            allowed += 1;
        } else {
            denied.push(decision);
        }
    }

    assert_eq!(allowed, 300);
    assert_eq!(denied.len(), 5);
    for decision in &denied {
        assert!(decision.retry_after <= Duration::from_secs(30));
        assert!(decision.retry_after > Duration::ZERO);
        assert_eq!(decision.remaining, 0);
    }

    clock.set(start + Duration::from_secs(31));
    let decision = limiter.check("10.0.0.7", &policy).await;
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 299);
}

#[tokio::test]
async fn test_independent_clients_do_not_interfere() {
    let (limiter, _, _) = setup(Duration::from_secs(90));
    let policy = LimitPolicy::new(25, Duration::from_secs(30)).unwrap();

    let mut alice = 0;
    let mut bob = 0;
    for _ in 0..25 {
        alice += limiter.check("alice", &policy).await.allowed as u32;
        bob += limiter.check("bob", &policy).await.allowed as u32;
    }

    assert_eq!(alice, 25);
    assert_eq!(bob, 25);
    assert!(!limiter.check("alice", &policy).await.allowed);
    assert!(!limiter.check("bob", &policy).await.allowed);
}

#[tokio::test]
async fn test_denied_in_one_window_allowed_in_next() {
    let (limiter, _, clock) = setup(Duration::from_secs(60));
    let policy = LimitPolicy::new(3, Duration::from_secs(10)).unwrap();

    for _ in 0..3 {
        assert!(limiter.check("client", &policy).await.allowed);
    }
    let denied = limiter.check("client", &policy).await;
    assert!(!denied.allowed);

    clock.advance(denied.retry_after);
    let decision = limiter.check("client", &policy).await;
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 2);
}

#[tokio::test]
async fn test_checks_are_not_idempotent() {
    let (limiter, _, _) = setup(Duration::from_secs(60));
    let policy = LimitPolicy::new(10, Duration::from_secs(10)).unwrap();

    let first = limiter.check("client", &policy).await;
    let second = limiter.check("client", &policy).await;

    assert_eq!(first.remaining, 9);
    assert_eq!(second.remaining, 8);
}

#[tokio::test]
async fn test_window_records_expire_after_period() {
    let (limiter, store, clock) = setup(Duration::from_secs(120));
    let policy = LimitPolicy::new(5, Duration::from_secs(30)).unwrap();

    limiter.check("client", &policy).await;
    assert_eq!(store.len(), 1);

    clock.advance(Duration::from_secs(29));
    assert_eq!(store.purge_expired(), 0);

    clock.advance(Duration::from_secs(1));
    assert_eq!(store.purge_expired(), 1);
    assert!(store.is_empty());
}

/// Store that refuses every call, as during an outage.
struct OutageStore;

#[async_trait]
impl CounterStore for OutageStore {
    async fn increment_and_get(&self, _key: &str) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("connection reset".to_string()))
    }

    async fn set_expiry_if_absent(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection reset".to_string()))
    }
}

#[tokio::test]
async fn test_outage_fails_open_for_every_call() {
    let limiter = RateLimiter::new(Arc::new(OutageStore));
    let guard: &dyn AdmissionGuard = &limiter;
    let policy = LimitPolicy::new(2, Duration::from_secs(30)).unwrap();

    for _ in 0..10 {
        let decision = guard.check("client", &policy).await;
        assert!(decision.allowed);
        assert!(decision.degraded);
    }
    assert_eq!(limiter.fail_open_total(), 10);
}

/// Store whose replies arrive after the limiter has stopped waiting. The
/// writes themselves land.
struct LateReplyStore(Arc<MemoryCounterStore>);

#[async_trait]
impl CounterStore for LateReplyStore {
    async fn increment_and_get(&self, key: &str) -> Result<u64, StoreError> {
        let count = self.0.increment_and_get(key).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(count)
    }

    async fn set_expiry_if_absent(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.0.set_expiry_if_absent(key, ttl).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let count = self.0.increment_with_expiry(key, ttl).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(count)
    }
}

#[tokio::test]
async fn test_late_replies_leave_no_immortal_records() {
    let clock = ManualClock::new(Duration::from_secs(1_200));
    let store = Arc::new(MemoryCounterStore::with_clock(Arc::new(clock.clone())));
    let limiter = RateLimiter::new(Arc::new(LateReplyStore(store.clone())))
        .with_clock(Arc::new(clock.clone()))
        .with_store_timeout(Duration::from_millis(20));
    let policy = LimitPolicy::new(5, Duration::from_secs(30)).unwrap();

    for _ in 0..3 {
        let decision = limiter.check("client", &policy).await;
        assert!(decision.allowed);
        assert!(decision.degraded);
    }
    assert_eq!(limiter.fail_open_total(), 3);

    // Every charge reached the store and the record carries the window TTL.
    let window = WindowKey::locate(DEFAULT_KEY_PREFIX, "client", &policy, clock.now());
    assert_eq!(store.get(&window.key), Some(3));
    assert_eq!(store.time_to_live(&window.key), Some(Duration::from_secs(30)));

    clock.advance(Duration::from_secs(30));
    assert_eq!(store.purge_expired(), 1);
    assert!(store.is_empty());
}
