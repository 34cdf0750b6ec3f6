//! HTTP surface for the guarded catalog API.

mod catalog;
mod middleware;
mod response;
mod server;

pub use catalog::CatalogQuery;
pub use middleware::{enforce_limit, ClientKeySource, GLOBAL_CLIENT, UNKNOWN_CLIENT};
pub use response::{
    apply_quota_headers, ApiBody, Envelope, LimitExceeded, LIMIT_EXCEEDED_CODE,
    X_RATELIMIT_DEGRADED, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use server::{ApiServer, AppState, CATALOG_API_PATH};
