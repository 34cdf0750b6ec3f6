//! Admission guard trait for abstracting limiter implementations.

use async_trait::async_trait;

use super::limiter::Decision;
use super::policy::LimitPolicy;

/// Trait for admission guards.
///
/// Request-handling code depends on this trait rather than on a concrete
/// limiter, so the HTTP layer can be driven by the store-backed
/// `RateLimiter` in production and by scripted guards in tests.
#[async_trait]
pub trait AdmissionGuard: Send + Sync {
    /// Charge one request against `client_key` and decide whether to admit it.
    ///
    /// Every call consumes quota, including calls that end up denied.
    async fn check(&self, client_key: &str, policy: &LimitPolicy) -> Decision;
}
