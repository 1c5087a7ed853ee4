//! Worker error types.
//!
//! The handler-facing variants display the generic messages callers see;
//! the underlying cause is kept as the error source and goes to the log.

use thiserror::Error;
use vgen_pipeline::PipelineError;
use vgen_queue::InputError;
use vgen_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Error parsing input")]
    InvalidInput(#[source] InputError),

    #[error("Storage client not created")]
    StorageUnavailable,

    #[error("Error generating video")]
    GenerationFailed(#[source] PipelineError),

    #[error("Error uploading video")]
    UploadFailed(#[source] StorageError),

    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Queue error: {0}")]
    Queue(#[from] vgen_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Message including the underlying cause, for logs and job records.
    pub fn detail(&self) -> String {
        match std::error::Error::source(self) {
            Some(source) => format!("{}: {}", self, source),
            None => self.to_string(),
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::GenerationFailed(e) | WorkerError::Pipeline(e) => e.is_retryable(),
            WorkerError::UploadFailed(e) | WorkerError::Storage(e) => e.is_retryable(),
            WorkerError::Timeout(_) | WorkerError::Queue(_) | WorkerError::Io(_) => true,
            _ => false,
        }
    }

    /// Check if this is a permanent failure that should NOT be retried.
    ///
    /// Bad input and missing storage configuration fail the same way on
    /// every attempt, so the job goes straight to the DLQ.
    pub fn is_permanent_failure(&self) -> bool {
        matches!(
            self,
            WorkerError::InvalidInput(_)
                | WorkerError::StorageUnavailable
                | WorkerError::ConfigError(_)
                | WorkerError::GenerationFailed(PipelineError::InvalidRequest(_))
        )
    }
}
