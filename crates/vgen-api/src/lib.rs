//! Axum HTTP API server.
//!
//! This crate provides:
//! - Synchronous generation returning MP4 bytes
//! - Job submission and status polling backed by the Redis queue
//! - Health and readiness probes
//! - Rate limiting, security headers and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
