//! Per-job structured logging.

use std::time::{Duration, Instant};

use tracing::{error, info, warn, Span};
use vgen_models::JobId;

/// Logs job lifecycle events with `job_id` and `operation` fields and
/// measures time since the job started.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    operation: &'static str,
    started: Instant,
}

impl JobLogger {
    /// `operation` is the job kind, e.g. "generate_video" or "warm_up".
    pub fn new(job_id: &JobId, operation: &'static str) -> Self {
        Self {
            job_id: job_id.clone(),
            operation,
            started: Instant::now(),
        }
    }

    pub fn log_start(&self, detail: &str) {
        info!(job_id = %self.job_id, operation = self.operation, "Starting {}: {}", self.operation, detail);
    }

    pub fn log_progress(&self, detail: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            elapsed_secs = self.elapsed().as_secs_f64(),
            "{}",
            detail
        );
    }

    pub fn log_warning(&self, detail: &str) {
        warn!(job_id = %self.job_id, operation = self.operation, "{}", detail);
    }

    pub fn log_error(&self, detail: &str) {
        error!(job_id = %self.job_id, operation = self.operation, "{}", detail);
    }

    pub fn log_completion(&self, detail: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            elapsed_secs = self.elapsed().as_secs_f64(),
            "Finished {}: {}",
            self.operation,
            detail
        );
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Span carrying the job fields, for instrumenting the job future.
    pub fn span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, operation = self.operation)
    }
}
