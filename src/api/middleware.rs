//! Admission middleware for guarded routes.

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::{debug, instrument};

use super::response::{apply_quota_headers, LimitExceeded};
use super::server::AppState;

/// Key used when nothing identifies the caller.
pub const UNKNOWN_CLIENT: &str = "unknown";
/// Key shared by every caller under [`ClientKeySource::Global`].
pub const GLOBAL_CLIENT: &str = "global";

/// How a request is mapped to the client key its quota is charged to.
///
/// The choice sets the fairness model: per address, per API identity, or a
/// single budget for the whole endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ClientKeySource {
    /// The peer's IP address
    #[default]
    RemoteAddr,
    /// The value of a request header, falling back to the peer address
    Header {
        /// Header name, e.g. `x-api-key`
        name: String,
    },
    /// One shared budget for all callers
    Global,
}

impl ClientKeySource {
    /// Derive the client key for a request.
    pub fn client_key(&self, request: &Request) -> String {
        match self {
            ClientKeySource::RemoteAddr => remote_addr(request),
            ClientKeySource::Header { name } => request
                .headers()
                .get(name.as_str())
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .map(|value| format!("id:{}", value))
                .unwrap_or_else(|| remote_addr(request)),
            ClientKeySource::Global => GLOBAL_CLIENT.to_string(),
        }
    }
}

fn remote_addr(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| format!("ip:{}", addr.ip()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Charge the request against its client's quota before dispatching it.
///
/// Denied requests never reach the handler; they get the denial body and
/// headers. Admitted responses are decorated with the remaining quota.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn enforce_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let client_key = state.key_source.client_key(&request);
    let decision = state.guard.check(&client_key, &state.policy).await;

    if !decision.allowed {
        debug!(
            client = %client_key,
            retry_after_ms = decision.retry_after.as_millis() as u64,
            "Request denied by rate limiter"
        );
        return LimitExceeded::from_decision(&decision).into_response();
    }

    let mut response = next.run(request).await;
    apply_quota_headers(response.headers_mut(), &decision);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(headers: &[(&str, &str)], peer: Option<SocketAddr>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/catalog/api/1.0/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(addr) = peer {
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        request
    }

    #[test]
    fn test_remote_addr_key_ignores_port() {
        let a = request_with(&[], Some("10.1.2.3:5000".parse().unwrap()));
        let b = request_with(&[], Some("10.1.2.3:6000".parse().unwrap()));

        let source = ClientKeySource::RemoteAddr;
        assert_eq!(source.client_key(&a), "ip:10.1.2.3");
        assert_eq!(source.client_key(&a), source.client_key(&b));
    }

    #[test]
    fn test_missing_peer_is_unknown() {
        let request = request_with(&[], None);
        assert_eq!(ClientKeySource::RemoteAddr.client_key(&request), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_header_key_with_fallback() {
        let source = ClientKeySource::Header {
            name: "x-api-key".to_string(),
        };
        let peer = Some("192.168.0.9:1234".parse().unwrap());

        let keyed = request_with(&[("x-api-key", "abc123")], peer);
        assert_eq!(source.client_key(&keyed), "id:abc123");

        let anonymous = request_with(&[], peer);
        assert_eq!(source.client_key(&anonymous), "ip:192.168.0.9");
    }

    #[test]
    fn test_global_key() {
        let request = request_with(&[], Some("10.0.0.1:1".parse().unwrap()));
        assert_eq!(ClientKeySource::Global.client_key(&request), GLOBAL_CLIENT);
    }

    #[test]
    fn test_deserialize_source() {
        let source: ClientKeySource = serde_yaml::from_str("source: global").unwrap();
        assert_eq!(source, ClientKeySource::Global);

        let source: ClientKeySource =
            serde_yaml::from_str("source: header\nname: x-api-key").unwrap();
        assert_eq!(
            source,
            ClientKeySource::Header {
                name: "x-api-key".to_string()
            }
        );
    }
}
