//! Job submission and status polling.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use vgen_models::{JobId, JobState};
use vgen_queue::{GenerateVideoJob, JobInput, JobRecord, QueueError, WarmUpJob};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Response for an accepted job.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub job_id: JobId,
    pub status: JobState,
}

/// Body of `POST /jobs/warm-up`.
#[derive(Debug, Default, Deserialize)]
pub struct WarmUpBody {
    #[serde(default)]
    pub test_generation: bool,
}

/// Accept both the bare input object and `{"input": {...}}`.
fn unwrap_input(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("input") => {
            map.remove("input").unwrap_or_default()
        }
        other => other,
    }
}

/// `POST /jobs`
///
/// Input is checked here so callers get a 400 instead of a dead-lettered job.
pub async fn enqueue_job(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    let queue = state
        .queue
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("job queue not configured"))?;

    let input = JobInput::new(unwrap_input(body));
    input
        .parse()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let job = GenerateVideoJob::new(input);
    let job_id = job.job_id.clone();

    if let Some(results) = &state.results {
        // The worker may finish before this lands, so record queued first
        results.set_status(&job_id, JobState::Queued).await?;
    }

    match queue.enqueue_generate(job).await {
        Ok(message_id) => {
            info!(job_id = %job_id, message_id = %message_id, "Enqueued generate_video job");
        }
        Err(QueueError::Duplicate(key)) => {
            warn!(job_id = %job_id, "Duplicate job submission: {}", key);
        }
        Err(e) => return Err(e.into()),
    }
    metrics::record_job_enqueued("generate_video");

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id,
            status: JobState::Queued,
        }),
    ))
}

/// `POST /jobs/warm-up`
pub async fn enqueue_warm_up(
    State(state): State<AppState>,
    body: Option<Json<WarmUpBody>>,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    let queue = state
        .queue
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("job queue not configured"))?;

    let Json(body) = body.unwrap_or_default();
    let job = WarmUpJob::new(body.test_generation);
    let job_id = job.job_id.clone();

    if let Some(results) = &state.results {
        results.set_status(&job_id, JobState::Queued).await?;
    }
    queue.enqueue_warm_up(job).await?;
    metrics::record_job_enqueued("warm_up");

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id,
            status: JobState::Queued,
        }),
    ))
}

/// `GET /jobs/:job_id`
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    let results = state
        .results
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("job store not configured"))?;

    results
        .get(&JobId::from_string(job_id.clone()))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("job {}", job_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_input() {
        let inner = json!({"prompt": "a cat", "negative_prompt": ""});
        assert_eq!(unwrap_input(json!({ "input": inner.clone() })), inner);
        assert_eq!(unwrap_input(inner.clone()), inner);
    }
}
