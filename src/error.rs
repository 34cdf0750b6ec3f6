//! Error types for the rlimiter service.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for rlimiter operations.
#[derive(Error, Debug)]
pub enum RlimiterError {
    /// Configuration-related errors, always raised at setup time
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors that could not be absorbed by fail-open
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Retry harness errors
    #[error("Harness error: {0}")]
    Harness(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for rlimiter operations.
pub type Result<T> = std::result::Result<T, RlimiterError>;
