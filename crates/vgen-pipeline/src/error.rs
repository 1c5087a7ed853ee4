//! Error types for pipeline operations.

use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that can occur while loading the model, generating or exporting.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Model load failed: {0}")]
    LoadFailed(String),

    #[error("Diffusion runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Diffusion runtime rejected request ({status}): {body}")]
    RuntimeRejected { status: u16, body: String },

    #[error("Invalid runtime response: {0}")]
    InvalidResponse(String),

    #[error("Invalid frame buffer: {0}")]
    InvalidFrames(String),

    #[error(transparent)]
    InvalidRequest(#[from] vgen_models::RequestError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn load_failed(message: impl Into<String>) -> Self {
        Self::LoadFailed(message.into())
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    pub fn invalid_frames(message: impl Into<String>) -> Self {
        Self::InvalidFrames(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether a runtime call that failed this way is worth repeating.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::RuntimeUnavailable(_) | PipelineError::Timeout(_) => true,
            PipelineError::Network(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}
