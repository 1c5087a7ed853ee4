//! Job identifiers, states and outputs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::MemoryStats;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job state as recorded in the result store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is waiting in queue
    #[default]
    Queued,
    /// Job is being processed
    Processing,
    /// Job completed successfully
    Completed,
    /// Job failed (may be retried)
    Failed,
    /// Job sent to DLQ after max retries
    DeadLettered,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::DeadLettered => "dead_lettered",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::DeadLettered)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result returned by the job handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobOutput {
    /// Signed download URL of the uploaded video
    pub video_url: String,
    /// Wall time for the whole job in seconds
    pub processing_time: f64,
    /// Time spent in generation and export, in seconds
    pub generation_time: f64,
    /// Runtime memory usage after generation
    pub memory_stats: MemoryStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_terminal() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::DeadLettered.is_terminal());
        assert!(!JobState::Failed.is_terminal());
        assert!(!JobState::Queued.is_terminal());
    }

    #[test]
    fn test_job_state_serialization() {
        let json = serde_json::to_string(&JobState::DeadLettered).unwrap();
        assert_eq!(json, "\"dead_lettered\"");
    }

    #[test]
    fn test_job_output_shape() {
        let output = JobOutput {
            video_url: "https://storage.example.com/signed".to_string(),
            processing_time: 12.5,
            generation_time: 10.0,
            memory_stats: MemoryStats::unavailable(),
        };

        let value = serde_json::to_value(&output).unwrap();
        assert!(value.get("video_url").is_some());
        assert!(value.get("processing_time").is_some());
        assert!(value.get("generation_time").is_some());
        assert!(value.get("memory_stats").is_some());
    }
}
