//! Health check handlers.

use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use tracing::warn;
use vgen_models::MemoryStats;

use crate::metrics::set_queue_lengths;
use crate::state::AppState;

/// Upper bound on asking the runtime for memory stats during a readiness check.
pub(crate) const MODEL_STATS_TIMEOUT: Duration = Duration::from_secs(2);

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub model: ModelStatus,
    pub checks: ReadinessChecks,
}

/// The model loads lazily, so an unloaded model does not make the server unready.
#[derive(Serialize)]
pub struct ModelStatus {
    pub backend: String,
    pub model_id: String,
    pub loaded: bool,
    pub memory: MemoryStats,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub redis: CheckStatus,
    pub storage: CheckStatus,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn ok(latency_ms: u64) -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
            latency_ms: Some(latency_ms),
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(msg.into()),
            latency_ms: None,
        }
    }

    fn disabled() -> Self {
        Self {
            status: "disabled".to_string(),
            error: None,
            latency_ms: None,
        }
    }

    fn is_error(&self) -> bool {
        self.status == "error"
    }
}

/// Readiness check endpoint (readiness probe).
/// Checks whichever of Redis and object storage are configured.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let redis_check = match &state.queue {
        Some(queue) => {
            let start = Instant::now();
            match queue.ping().await {
                Ok(()) => {
                    let latency = start.elapsed().as_millis() as u64;
                    if let (Ok(len), Ok(dlq_len)) = (queue.len().await, queue.dlq_len().await) {
                        set_queue_lengths(len, dlq_len);
                    }
                    CheckStatus::ok(latency)
                }
                Err(e) => CheckStatus::error(e.to_string()),
            }
        }
        None => CheckStatus::disabled(),
    };

    let storage_check = match &state.storage {
        Some(storage) => {
            let start = Instant::now();
            match storage.check_connectivity().await {
                Ok(()) => CheckStatus::ok(start.elapsed().as_millis() as u64),
                Err(e) => CheckStatus::error(e.to_string()),
            }
        }
        None => CheckStatus::disabled(),
    };

    let config = state.pipeline.config();
    let memory = match tokio::time::timeout(MODEL_STATS_TIMEOUT, state.pipeline.memory_stats()).await {
        Ok(Ok(stats)) => stats,
        Ok(Err(e)) => {
            warn!("Memory stats unavailable: {}", e);
            MemoryStats::unavailable()
        }
        Err(_) => {
            warn!("Memory stats timed out after {:?}", MODEL_STATS_TIMEOUT);
            MemoryStats::unavailable()
        }
    };
    let model = ModelStatus {
        backend: config.backend.to_string(),
        model_id: config.model_id.clone(),
        loaded: state.pipeline.is_loaded(),
        memory,
    };

    let all_ok = !redis_check.is_error() && !storage_check.is_error();
    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" }.to_string(),
        model,
        checks: ReadinessChecks {
            redis: redis_check,
            storage: storage_check,
        },
    };

    if all_ok {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
