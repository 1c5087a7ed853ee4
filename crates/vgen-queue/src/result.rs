//! Job status and output records.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vgen_models::{JobId, JobOutput, JobState};

use crate::error::QueueResult;

/// How long job records are kept.
pub const RESULT_TTL_SECS: u64 = 24 * 60 * 60;

/// What callers see when they poll a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JobOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobState::Queued,
            output: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    fn with_status(mut self, status: JobState) -> Self {
        self.status = status;
        self.updated_at = Utc::now();
        self
    }

    fn completed(self, output: JobOutput) -> Self {
        let mut record = self.with_status(JobState::Completed);
        record.output = Some(output);
        record.error = None;
        record
    }

    fn failed(self, status: JobState, error: String) -> Self {
        let mut record = self.with_status(status);
        record.error = Some(error);
        record
    }
}

/// Redis-backed store of [`JobRecord`]s.
pub struct JobResultStore {
    client: redis::Client,
}

impl JobResultStore {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    fn key(job_id: &JobId) -> String {
        format!("vgen:job:{}", job_id)
    }

    /// Fetch a job record.
    pub async fn get(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(Self::key(job_id)).await?;
        raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
    }

    async fn put(&self, record: &JobRecord) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(record)?;
        conn.set_ex::<_, _, ()>(Self::key(&record.job_id), payload, RESULT_TTL_SECS)
            .await?;
        debug!(job_id = %record.job_id, status = %record.status, "Stored job record");
        Ok(())
    }

    async fn current(&self, job_id: &JobId) -> QueueResult<JobRecord> {
        Ok(self
            .get(job_id)
            .await?
            .unwrap_or_else(|| JobRecord::new(job_id.clone())))
    }

    /// Record a status change.
    pub async fn set_status(&self, job_id: &JobId, status: JobState) -> QueueResult<()> {
        let record = self.current(job_id).await?.with_status(status);
        self.put(&record).await
    }

    /// Record successful completion.
    pub async fn store_output(&self, job_id: &JobId, output: &JobOutput) -> QueueResult<()> {
        let record = self.current(job_id).await?.completed(output.clone());
        self.put(&record).await
    }

    /// Record a failure. `status` is `Failed` or `DeadLettered`.
    pub async fn store_error(&self, job_id: &JobId, status: JobState, error: &str) -> QueueResult<()> {
        let record = self.current(job_id).await?.failed(status, error.to_string());
        self.put(&record).await
    }
}
