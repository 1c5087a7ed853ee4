//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Job timeout
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Directory generated videos are written to before upload
    pub work_dir: PathBuf,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Interval for refreshing job ownership while processing (prevents premature reclamation)
    pub job_heartbeat_interval: Duration,
    /// Retries for the upload step
    pub upload_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            // One model per GPU; generation is serialized anyway
            max_concurrent_jobs: 1,
            job_timeout: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(60),
            work_dir: PathBuf::from("/tmp"),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300),
            job_heartbeat_interval: Duration::from_secs(30),
            upload_retries: 3,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS", base.max_concurrent_jobs).max(1),
            job_timeout: env_secs("WORKER_JOB_TIMEOUT", base.job_timeout),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT", base.shutdown_timeout),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(base.work_dir),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS", base.claim_interval),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS", base.claim_min_idle),
            job_heartbeat_interval: env_secs("WORKER_JOB_HEARTBEAT_SECS", base.job_heartbeat_interval),
            upload_retries: env_parse("WORKER_UPLOAD_RETRIES", base.upload_retries),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(key, default.as_secs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.work_dir, PathBuf::from("/tmp"));
        assert!(config.job_heartbeat_interval < config.claim_min_idle);
    }
}
