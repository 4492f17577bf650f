//! # HTTP Middleware
//!
//! Request tracing, Prometheus metrics, and per-client rate limiting.
//! Authentication lives in [`crate::auth`].

pub mod metrics;
pub mod rate_limit;
pub mod tracing_layer;
