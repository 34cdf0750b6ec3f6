//! Catalog API handler.
//!
//! Catalog persistence lives outside this crate; the handler only stands in
//! for the guarded endpoint and validates its query the way the real one
//! does, so business errors can be told apart from rate limit denials.

use axum::extract::Query;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::response::Envelope;

/// Query parameters accepted by the catalog API.
#[derive(Debug, Default, Deserialize)]
pub struct CatalogQuery {
    /// `categories` or `items`
    pub q: Option<String>,
    /// Maximum number of results
    pub limit: Option<usize>,
    /// Item name to search for
    pub search: Option<String>,
    /// Restrict results to one owner
    pub user_id: Option<u64>,
}

/// `GET|POST /catalog/api/1.0/`
pub async fn index(Query(query): Query<CatalogQuery>) -> Envelope {
    let collection = match query.q.as_deref().map(str::to_lowercase) {
        None => "items".to_string(),
        Some(q) if q == "categories" || q == "items" => q,
        Some(other) => {
            return Envelope::failure(
                StatusCode::BAD_REQUEST,
                format!("Unknown query {:?}, expected categories or items", other),
            );
        }
    };

    Envelope::ok(
        json!({
            "collection": collection,
            "search": query.search,
            "user_id": query.user_id,
            "limit": query.limit,
            "results": [],
        }),
        "No data found.",
    )
}
