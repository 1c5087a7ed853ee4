//! Text-to-video pipeline.
//!
//! This crate provides:
//! - A process-wide, lazily loaded model handle
//! - Runtime backends (HTTP diffusion runtime sidecar, synthetic preview)
//! - Translation of requests into runtime call arguments
//! - MP4 export of generated frames through FFmpeg
//! - Model warm-up for container start

pub mod command;
pub mod config;
pub mod error;
pub mod export;
pub mod frames;
pub mod handle;
pub mod model;
pub mod preview;
pub mod sidecar;
pub mod warmup;

pub use command::{check_ffmpeg, FfmpegCommand, FfmpegProgress, FfmpegRunner};
pub use config::{CompileConfig, CudaConfig, OptimizationConfig, PipelineConfig, RuntimeBackend};
pub use error::{PipelineError, PipelineResult};
pub use export::export_to_video;
pub use frames::VideoFrames;
pub use handle::{GenerationOutput, PipelineHandle};
pub use model::{loader_for, ModelLoader, TextToVideoModel};
pub use preview::{PreviewLoader, PreviewModel};
pub use sidecar::{SidecarLoader, SidecarModel};
pub use warmup::{warm_up, WarmUpReport};
