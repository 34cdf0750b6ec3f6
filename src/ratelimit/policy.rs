//! Limit policies attached to guarded endpoints.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, RlimiterError};

/// Scope used when a policy is not given a name.
pub const DEFAULT_SCOPE: &str = "default";

/// An immutable `(limit, period)` pair.
///
/// Policies are validated on construction, so a `LimitPolicy` that exists is
/// always usable at request time. The scope namespaces counters: two policies
/// with different scopes never share a window record for the same client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitPolicy {
    limit: u64,
    period: Duration,
    scope: String,
}

impl LimitPolicy {
    /// Create a policy allowing `limit` requests per `period`.
    ///
    /// Fails when `limit` is zero or `period` is shorter than one millisecond,
    /// the granularity windows are computed at.
    pub fn new(limit: u64, period: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(RlimiterError::Config(
                "rate limit must allow at least one request".to_string(),
            ));
        }
        if period.as_millis() == 0 {
            return Err(RlimiterError::Config(format!(
                "rate limit period must be at least 1ms, got {:?}",
                period
            )));
        }

        Ok(Self {
            limit,
            period,
            scope: DEFAULT_SCOPE.to_string(),
        })
    }

    /// Set the scope used to namespace this policy's counters.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.scope = name.into();
        self
    }

    /// Maximum requests admitted per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Window length in whole milliseconds; never zero.
    pub fn period_millis(&self) -> u64 {
        self.period.as_millis() as u64
    }

    /// Counter namespace for this policy.
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

/// Serialized form of a limit policy, as it appears in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Requests allowed per period
    pub limit: u64,
    /// Period length in seconds
    pub period_secs: u64,
    /// Optional scope name
    #[serde(default)]
    pub name: Option<String>,
}

impl LimitSettings {
    /// Validate the settings and turn them into a policy.
    pub fn to_policy(&self) -> Result<LimitPolicy> {
        let policy = LimitPolicy::new(self.limit, Duration::from_secs(self.period_secs))?;
        Ok(match &self.name {
            Some(name) => policy.with_name(name.clone()),
            None => policy,
        })
    }
}
