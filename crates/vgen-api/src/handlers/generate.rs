//! Synchronous generation.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use tracing::{error, info, warn};
use vgen_models::{output_file_name, GenerationRequest};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// `POST /generate-video`
///
/// Generates the clip into the output directory and returns the MP4 bytes.
/// Any failure after validation is a 500 whose detail carries the cause.
pub async fn generate_video(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> ApiResult<impl IntoResponse> {
    request.validate_all()?;

    let config = state.pipeline.config();
    let file_name = output_file_name();
    let path = config.output_dir.join(&file_name);
    info!(
        width = request.width,
        height = request.height,
        seconds = request.seconds,
        "Generating {}",
        file_name
    );

    let generated = state.pipeline.generate_video(&request, &path).await.map_err(|e| {
        error!("Error generating video: {}", e);
        ApiError::generation(e)
    })?;

    let bytes = tokio::fs::read(&generated.path).await.map_err(|e| {
        error!("Error reading {}: {}", generated.path.display(), e);
        ApiError::generation(e)
    })?;

    if config.cleanup_outputs {
        if let Err(e) = tokio::fs::remove_file(&generated.path).await {
            warn!("Failed to remove {}: {}", generated.path.display(), e);
        }
    }

    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    ))
}
