//! Redis Streams job queue.
//!
//! This crate provides:
//! - Job enqueueing via Redis Streams with idempotency-key dedup
//! - Worker consumption with retry counters, pending-claim and DLQ
//! - Job status/output records with a TTL
//! - Progress events via Redis Pub/Sub

pub mod error;
pub mod job;
pub mod progress;
pub mod queue;
pub mod result;

pub use error::{QueueError, QueueResult};
pub use job::{GenerateVideoJob, InputError, JobInput, QueueJob, WarmUpJob};
pub use progress::{ProgressChannel, ProgressEvent};
pub use queue::{JobQueue, QueueConfig};
pub use result::{JobRecord, JobResultStore, RESULT_TTL_SECS};
