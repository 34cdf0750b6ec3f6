//! HTTP server for the guarded catalog API.

use axum::middleware;
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::catalog;
use super::middleware::{enforce_limit, ClientKeySource};
use crate::error::{Result, RlimiterError};
use crate::ratelimit::{AdmissionGuard, LimitPolicy};

/// Path of the guarded catalog API.
pub const CATALOG_API_PATH: &str = "/catalog/api/1.0/";

/// Shared state handed to every request.
#[derive(Clone)]
pub struct AppState {
    /// The admission guard
    pub guard: Arc<dyn AdmissionGuard>,
    /// Policy attached to the guarded endpoint, fixed at startup
    pub policy: Arc<LimitPolicy>,
    /// How requests map to client keys
    pub key_source: Arc<ClientKeySource>,
}

/// HTTP server for the catalog API.
pub struct ApiServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Request state
    state: AppState,
}

impl ApiServer {
    /// Create a new server guarding the catalog API with `guard` under `policy`.
    pub fn new(
        addr: SocketAddr,
        guard: Arc<dyn AdmissionGuard>,
        policy: LimitPolicy,
        key_source: ClientKeySource,
    ) -> Self {
        Self {
            addr,
            state: AppState {
                guard,
                policy: Arc::new(policy),
                key_source: Arc::new(key_source),
            },
        }
    }

    /// Build the router. Only the catalog API is guarded.
    pub fn router(&self) -> Router {
        Router::new()
            .route(CATALOG_API_PATH, get(catalog::index).post(catalog::index))
            .route(
                CATALOG_API_PATH.trim_end_matches('/'),
                get(catalog::index).post(catalog::index),
            )
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                enforce_limit,
            ))
            .route("/health", get(health))
            .with_state(self.state.clone())
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(
            addr = %addr,
            limit = self.state.policy.limit(),
            period_secs = self.state.policy.period().as_secs_f64(),
            "Starting HTTP server for catalog API"
        );

        let app = self.router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            RlimiterError::Io(e)
        })
    }
}

async fn health() -> &'static str {
    "ok"
}
