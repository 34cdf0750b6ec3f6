//! Wire shapes for catalog API responses.
//!
//! Normal replies, including business-logic failures, use [`Envelope`]:
//! `{ "data": ..., "response": "...", "status": 200 }`. A rate limit denial
//! uses [`LimitExceeded`]: `{ "error": 429, "data": "...", "retry_after": 12 }`.
//! The `error` field only ever appears on denials, which lets callers tell
//! "try again later" apart from "bad request" without looking at headers.

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::ratelimit::Decision;

/// Error code carried by every denial body.
pub const LIMIT_EXCEEDED_CODE: u16 = 429;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_RATELIMIT_DEGRADED: HeaderName = HeaderName::from_static("x-ratelimit-degraded");

/// Body of a normal reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Payload; `null` for failures
    #[serde(default)]
    pub data: Value,
    /// Human-readable summary
    pub response: String,
    /// HTTP status code mirrored into the body
    pub status: u16,
}

impl Envelope {
    /// A successful reply.
    pub fn ok(data: Value, response: impl Into<String>) -> Self {
        Self {
            data,
            response: response.into(),
            status: StatusCode::OK.as_u16(),
        }
    }

    /// A business-logic failure such as a malformed query.
    pub fn failure(status: StatusCode, response: impl Into<String>) -> Self {
        Self {
            data: Value::Null,
            response: response.into(),
            status: status.as_u16(),
        }
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Body of a rate limit denial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitExceeded {
    /// Always [`LIMIT_EXCEEDED_CODE`]
    pub error: u16,
    /// Human-readable reason
    pub data: String,
    /// Seconds until the window resets
    #[serde(default)]
    pub retry_after: u64,
    /// Limit that was exceeded
    #[serde(default)]
    pub limit: u64,
}

impl LimitExceeded {
    /// Build the denial body for a decision.
    pub fn from_decision(decision: &Decision) -> Self {
        let retry_after = whole_seconds(decision.retry_after).max(1);
        Self {
            error: LIMIT_EXCEEDED_CODE,
            data: format!(
                "Rate limit of {} requests exceeded, retry in {}s",
                decision.limit, retry_after
            ),
            retry_after,
            limit: decision.limit,
        }
    }

    /// The server's retry hint as a duration.
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after)
    }
}

impl IntoResponse for LimitExceeded {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from(self.retry_after));
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u64));

        (StatusCode::TOO_MANY_REQUESTS, headers, Json(self)).into_response()
    }
}

/// Any catalog API body, parsed uniformly by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiBody {
    /// Denial; tried first because only denials carry `error`
    LimitExceeded(LimitExceeded),
    /// Normal reply
    Envelope(Envelope),
}

impl ApiBody {
    /// Parse a response body.
    pub fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Whether this body is a rate limit denial.
    pub fn is_limited(&self) -> bool {
        matches!(self, ApiBody::LimitExceeded(_))
    }
}

/// Decorate an admitted response with quota headers.
pub fn apply_quota_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(whole_seconds(decision.reset_after)),
    );
    if decision.degraded {
        headers.insert(X_RATELIMIT_DEGRADED, HeaderValue::from_static("true"));
    }
}

/// Round a duration up to whole seconds.
fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn denied(retry_after: Duration) -> Decision {
        Decision {
            allowed: false,
            remaining: 0,
            limit: 300,
            retry_after,
            reset_after: retry_after,
            degraded: false,
        }
    }

    #[test]
    fn test_denial_body_shape() {
        let body = LimitExceeded::from_decision(&denied(Duration::from_millis(12_300)));
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["error"], 429);
        assert_eq!(value["retry_after"], 13);
        assert!(value["data"].as_str().unwrap().contains("300"));
        assert!(value.get("status").is_none());
    }

    #[test]
    fn test_sub_second_retry_rounds_up() {
        let body = LimitExceeded::from_decision(&denied(Duration::from_millis(5)));
        assert_eq!(body.retry_after, 1);
    }

    #[test]
    fn test_denial_response_headers() {
        let response = LimitExceeded::from_decision(&denied(Duration::from_secs(7))).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "7");
        assert_eq!(response.headers()[&X_RATELIMIT_REMAINING], "0");
        assert_eq!(response.headers()[&X_RATELIMIT_LIMIT], "300");
    }

    #[test]
    fn test_envelope_status_carried_to_http() {
        let response = Envelope::failure(StatusCode::BAD_REQUEST, "Unknown query").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_parse_distinguishes_denial() {
        let denial = br#"{"error": 429, "data": "slow down", "retry_after": 4}"#;
        let body = ApiBody::parse(denial).unwrap();
        assert!(body.is_limited());
        match body {
            ApiBody::LimitExceeded(d) => assert_eq!(d.retry_after(), Duration::from_secs(4)),
            other => panic!("unexpected body: {:?}", other),
        }

        let success = serde_json::to_vec(&Envelope::ok(json!([1, 2]), "Data found.")).unwrap();
        assert!(!ApiBody::parse(&success).unwrap().is_limited());

        let failure = br#"{"data": null, "response": "Unknown query", "status": 400}"#;
        assert_eq!(
            ApiBody::parse(failure).unwrap(),
            ApiBody::Envelope(Envelope::failure(StatusCode::BAD_REQUEST, "Unknown query"))
        );
    }

    #[test]
    fn test_quota_headers() {
        let decision = Decision {
            allowed: true,
            remaining: 41,
            limit: 50,
            retry_after: Duration::ZERO,
            reset_after: Duration::from_millis(2_500),
            degraded: true,
        };
        let mut headers = HeaderMap::new();
        apply_quota_headers(&mut headers, &decision);

        assert_eq!(headers[&X_RATELIMIT_LIMIT], "50");
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "41");
        assert_eq!(headers[&X_RATELIMIT_RESET], "3");
        assert_eq!(headers[&X_RATELIMIT_DEGRADED], "true");
    }
}
