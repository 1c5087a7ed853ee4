//! Object storage for generated videos.
//!
//! This crate provides:
//! - An S3-compatible client (upload with cache-control, presigned GET URLs)
//! - Video key layout and the upload-then-sign flow used by the job handler

pub mod client;
pub mod error;
pub mod operations;

pub use client::{StorageClient, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use operations::VIDEO_CONTENT_TYPE;
