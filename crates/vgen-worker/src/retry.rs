//! Exponential backoff for flaky external calls.
//!
//! Used for the upload step; `FailureTracker` throttles logs from the
//! Redis heartbeat.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Backoff policy: `base * 2^attempt`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Name used in log lines.
    pub operation_name: &'static str,
}

impl RetryConfig {
    pub fn new(operation_name: &'static str) -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            operation_name,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or the retries run out.
/// The last error is returned unchanged.
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", config.operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < config.max_retries => {
                let delay = config.backoff(attempt);
                attempt += 1;
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    config.operation_name,
                    attempt,
                    config.max_retries + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Counts consecutive failures of a repeated background call and says
/// whether each one is still worth logging.
#[derive(Debug)]
pub struct FailureTracker {
    consecutive: u32,
    log_limit: u32,
}

impl FailureTracker {
    pub fn new(log_limit: u32) -> Self {
        Self {
            consecutive: 0,
            log_limit,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive > self.log_limit {
            debug!("Recovered after {} consecutive failures", self.consecutive);
        }
        self.consecutive = 0;
    }

    /// Returns `true` while the failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive == self.log_limit + 1 {
            warn!("{} consecutive failures, muting further logs until recovery", self.consecutive);
        }
        self.consecutive <= self.log_limit
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig::new("upload").with_base_delay(Duration::from_millis(100));
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(400));
        assert_eq!(config.backoff(40), Duration::from_secs(10));
    }

    #[test]
    fn test_failure_tracker_mutes_then_resets() {
        let mut tracker = FailureTracker::new(2);
        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(!tracker.record_failure());

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let config = RetryConfig::new("upload").with_base_delay(Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result = retry_async(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("connection reset")
                } else {
                    Ok("Avatars/output_1.mp4")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("Avatars/output_1.mp4"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_last_error_is_returned() {
        let config = RetryConfig::new("upload")
            .with_base_delay(Duration::from_millis(1))
            .with_max_retries(1);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_async(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("bucket not found") }
        })
        .await;

        assert_eq!(result, Err("bucket not found"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
