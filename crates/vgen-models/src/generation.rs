//! Generation requests and runtime call parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

/// Frame rate the model is sampled at.
pub const DEFAULT_FPS: u32 = 24;
/// Default output width in pixels.
pub const DEFAULT_WIDTH: u32 = 1280;
/// Default output height in pixels.
pub const DEFAULT_HEIGHT: u32 = 720;
/// Default clip duration in seconds.
pub const DEFAULT_SECONDS: f64 = 5.0;

/// Width and height must be multiples of the VAE spatial stride.
const DIMENSION_MULTIPLE: u32 = 8;

/// Errors raised while validating a generation request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Invalid request: {0}")]
    Invalid(#[from] ValidationErrors),

    #[error("{name} must be a multiple of {multiple}, got {value}")]
    Dimension {
        name: &'static str,
        value: u32,
        multiple: u32,
    },
}

/// A text-to-video request as received from a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct GenerationRequest {
    /// Text prompt describing the video
    #[validate(length(min = 1, max = 4000))]
    pub prompt: String,

    /// Things the model should steer away from
    #[validate(length(max = 4000))]
    pub negative_prompt: String,

    /// Output width in pixels
    #[serde(default = "default_width")]
    #[validate(range(min = 64, max = 2048))]
    pub width: u32,

    /// Output height in pixels
    #[serde(default = "default_height")]
    #[validate(range(min = 64, max = 2048))]
    pub height: u32,

    /// Clip duration in seconds
    #[serde(default = "default_seconds")]
    #[validate(range(exclusive_min = 0.0, max = 30.0))]
    pub seconds: f64,
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

fn default_seconds() -> f64 {
    DEFAULT_SECONDS
}

impl GenerationRequest {
    /// Create a request with the default size and duration.
    pub fn new(prompt: impl Into<String>, negative_prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: negative_prompt.into(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            seconds: DEFAULT_SECONDS,
        }
    }

    /// Set output size.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set duration in seconds.
    pub fn with_seconds(mut self, seconds: f64) -> Self {
        self.seconds = seconds;
        self
    }

    /// Reject width/height the model cannot produce.
    pub fn check_dimensions(&self) -> Result<(), RequestError> {
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value % DIMENSION_MULTIPLE != 0 {
                return Err(RequestError::Dimension {
                    name,
                    value,
                    multiple: DIMENSION_MULTIPLE,
                });
            }
        }
        Ok(())
    }

    /// Run field validation and the dimension check.
    pub fn validate_all(&self) -> Result<(), RequestError> {
        self.validate()?;
        self.check_dimensions()
    }

    /// Translate the request into runtime call arguments.
    pub fn to_params(&self, defaults: &GenerationDefaults) -> GenerationParams {
        GenerationParams {
            prompt: self.prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            height: self.height,
            width: self.width,
            num_frames: num_frames(defaults.fps, self.seconds),
            guidance_scale: defaults.guidance_scale,
            num_inference_steps: defaults.num_inference_steps,
            max_sequence_length: defaults.max_sequence_length,
            fps: defaults.fps,
            seed: None,
        }
    }
}

/// Sampling defaults that are not part of a request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationDefaults {
    pub fps: u32,
    pub guidance_scale: f32,
    pub num_inference_steps: u32,
    pub max_sequence_length: u32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            guidance_scale: 5.0,
            num_inference_steps: 20,
            max_sequence_length: 256,
        }
    }
}

/// Arguments passed to the diffusion runtime for one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub height: u32,
    pub width: u32,
    pub num_frames: u32,
    pub guidance_scale: f32,
    pub num_inference_steps: u32,
    pub max_sequence_length: u32,
    pub fps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Number of frames for a clip: one per `1/fps` second plus the initial frame.
pub fn num_frames(fps: u32, seconds: f64) -> u32 {
    (fps as f64 * seconds).max(0.0) as u32 + 1
}

/// Random output file name (`output_<uuid>.mp4`).
pub fn output_file_name() -> String {
    format!("output_{}.mp4", Uuid::new_v4())
}
