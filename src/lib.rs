//! Rlimiter - Fixed-Window Admission Control for the Catalog API
//!
//! This crate implements a rate limiting guard that sits in front of a request
//! handler. Counts live in an external counter store (Redis in production) so
//! that every server process sharing the store enforces the same limit. When
//! the store cannot be reached the guard fails open and logs the degradation.

pub mod api;
pub mod config;
pub mod error;
pub mod harness;
pub mod ratelimit;
pub mod store;
