//! Video generation worker.
//!
//! This crate provides:
//! - Job executor (consume, bounded concurrency, pending-claim, retry/DLQ)
//! - The generate-upload-sign job handler
//! - Job status recording and progress emission
//! - Graceful shutdown

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod handler;
pub mod logging;
pub mod retry;

pub use config::WorkerConfig;
pub use context::WorkerContext;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use handler::{handle_job, handle_warm_up};
pub use logging::JobLogger;
