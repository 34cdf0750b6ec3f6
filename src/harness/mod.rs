//! Client retry harness.
//!
//! Drives a guarded endpoint at a steady rate and backs off whenever the
//! limiter denies a request, then carries on from where it stopped. It is a
//! load and verification tool rather than production code, but it exercises
//! the guard's contract: a denial is safe to retry and costs nothing beyond
//! the increment already charged.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::{ApiBody, Envelope, LimitExceeded};
use crate::error::{Result, RlimiterError};

/// Settings for a harness run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Endpoint to call
    pub url: String,
    /// Requests to get through per `period`; also the run's target
    pub requests_per_period: u32,
    /// Pacing period
    pub period: Duration,
    /// Pause after a denial or transport failure
    pub backoff: Duration,
    /// Consecutive setbacks tolerated before giving up
    pub max_consecutive_denials: u32,
    /// Wait for the server's `retry_after` hint instead of `backoff`
    pub honor_retry_after: bool,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/catalog/api/1.0/".to_string(),
            requests_per_period: 60,
            period: Duration::from_secs(60),
            backoff: Duration::from_secs(5),
            max_consecutive_denials: 50,
            honor_retry_after: false,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl HarnessConfig {
    /// Check the settings describe a runnable plan.
    pub fn validate(&self) -> Result<()> {
        if self.requests_per_period == 0 {
            return Err(RlimiterError::Config(
                "requests_per_period must be positive".to_string(),
            ));
        }
        if self.period.is_zero() {
            return Err(RlimiterError::Config("period must be positive".to_string()));
        }
        if self.max_consecutive_denials == 0 {
            return Err(RlimiterError::Config(
                "max_consecutive_denials must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Pause between consecutive requests.
    pub fn interval(&self) -> Duration {
        self.period / self.requests_per_period
    }
}

/// What the endpoint said about a single request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Served successfully
    Accepted(Envelope),
    /// Served with a business-logic failure; not retried
    Rejected(Envelope),
    /// Turned away by the rate limiter
    Denied(LimitExceeded),
}

/// Tally of a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarnessReport {
    /// Requests served successfully
    pub accepted: u32,
    /// Requests served with a business-logic failure
    pub rejected: u32,
    /// Requests denied by the limiter
    pub denied: u32,
    /// Requests that never got a parseable reply
    pub failed: u32,
}

impl HarnessReport {
    /// Requests that made it past the limiter.
    pub fn served(&self) -> u32 {
        self.accepted + self.rejected
    }
}

/// Rate-paced client that retries on denial.
pub struct RetryHarness {
    client: reqwest::Client,
    config: HarnessConfig,
}

impl RetryHarness {
    /// Create a harness for a validated configuration.
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    /// The configuration this harness runs with.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Issue one request and classify the reply.
    pub async fn send_once(&self) -> Result<Reply> {
        let response = self.client.get(&self.config.url).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        let body = ApiBody::parse(&bytes).map_err(|e| {
            RlimiterError::Harness(format!("unparseable reply with status {}: {}", status, e))
        })?;

        Ok(match body {
            ApiBody::LimitExceeded(denial) => Reply::Denied(denial),
            ApiBody::Envelope(envelope) if status.is_success() => Reply::Accepted(envelope),
            ApiBody::Envelope(envelope) => Reply::Rejected(envelope),
        })
    }

    /// Run until `requests_per_period` requests have been served.
    ///
    /// Denials and transport failures pause the run and are retried. The run
    /// gives up once `max_consecutive_denials` setbacks happen in a row.
    pub async fn run(&self) -> Result<HarnessReport> {
        let interval = self.config.interval();
        let target = self.config.requests_per_period;
        let mut report = HarnessReport::default();
        let mut setbacks = 0u32;

        info!(
            url = %self.config.url,
            target = target,
            interval_ms = interval.as_millis() as u64,
            "Sending requests"
        );

        while report.served() < target {
            let pause = match self.send_once().await {
                Ok(Reply::Accepted(envelope)) => {
                    report.accepted += 1;
                    setbacks = 0;
                    info!(
                        served = report.served(),
                        response = %envelope.response,
                        "Request served"
                    );
                    interval
                }
                Ok(Reply::Rejected(envelope)) => {
                    report.rejected += 1;
                    setbacks = 0;
                    warn!(
                        served = report.served(),
                        status = envelope.status,
                        response = %envelope.response,
                        "Request rejected"
                    );
                    interval
                }
                Ok(Reply::Denied(denial)) => {
                    report.denied += 1;
                    setbacks += 1;
                    let pause = self.backoff_for(Some(&denial));
                    warn!(
                        error = denial.error,
                        reason = %denial.data,
                        backoff_ms = pause.as_millis() as u64,
                        "Hit rate limit, backing off"
                    );
                    pause
                }
                Err(e) => {
                    report.failed += 1;
                    setbacks += 1;
                    let pause = self.backoff_for(None);
                    warn!(
                        error = %e,
                        backoff_ms = pause.as_millis() as u64,
                        "Request failed, backing off"
                    );
                    pause
                }
            };

            if setbacks >= self.config.max_consecutive_denials {
                warn!(?report, "Giving up");
                return Err(RlimiterError::Harness(format!(
                    "gave up after {} consecutive denials or failures ({} of {} served)",
                    setbacks,
                    report.served(),
                    target
                )));
            }

            if report.served() < target {
                debug!(pause_ms = pause.as_millis() as u64, "Pausing");
                tokio::time::sleep(pause).await;
            }
        }

        info!(?report, "Run complete");
        Ok(report)
    }

    fn backoff_for(&self, denial: Option<&LimitExceeded>) -> Duration {
        match denial {
            Some(denial) if self.config.honor_retry_after && denial.retry_after > 0 => {
                denial.retry_after()
            }
            _ => self.config.backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denial(retry_after: u64) -> LimitExceeded {
        LimitExceeded {
            error: 429,
            data: "slow down".to_string(),
            retry_after,
            limit: 1,
        }
    }

    #[test]
    fn test_interval() {
        let config = HarnessConfig {
            requests_per_period: 120,
            period: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(config.interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let config = HarnessConfig {
            requests_per_period: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RlimiterError::Config(_))));
        assert!(RetryHarness::new(config).is_err());
    }

    #[test]
    fn test_fixed_backoff_by_default() {
        let harness = RetryHarness::new(HarnessConfig::default()).unwrap();
        assert_eq!(harness.backoff_for(Some(&denial(17))), Duration::from_secs(5));
        assert_eq!(harness.backoff_for(None), Duration::from_secs(5));
    }

    #[test]
    fn test_honors_retry_after_hint() {
        let harness = RetryHarness::new(HarnessConfig {
            honor_retry_after: true,
            ..Default::default()
        })
        .unwrap();

        assert_eq!(harness.backoff_for(Some(&denial(17))), Duration::from_secs(17));
        assert_eq!(harness.backoff_for(Some(&denial(0))), Duration::from_secs(5));
    }

    #[test]
    fn test_report_served() {
        let report = HarnessReport {
            accepted: 3,
            rejected: 2,
            denied: 7,
            failed: 1,
        };
        assert_eq!(report.served(), 5);
    }
}
