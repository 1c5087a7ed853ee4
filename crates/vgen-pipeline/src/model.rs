//! Model traits implemented by runtime backends.

use std::sync::Arc;

use async_trait::async_trait;
use vgen_models::{GenerationParams, MemoryStats};

use crate::config::{PipelineConfig, RuntimeBackend};
use crate::error::PipelineResult;
use crate::preview::PreviewLoader;
use crate::sidecar::SidecarLoader;

/// A loaded text-to-video model.
///
/// Implementations own whatever resources the runtime needs and must be
/// safe to share across tasks; the handle serializes calls to `generate`.
#[async_trait]
pub trait TextToVideoModel: Send + Sync {
    /// Short backend name for logs and metrics.
    fn name(&self) -> &str;

    /// Run the diffusion pipeline and return decoded frames.
    async fn generate(&self, params: &GenerationParams) -> PipelineResult<crate::VideoFrames>;

    /// Current device memory usage.
    async fn memory_stats(&self) -> PipelineResult<MemoryStats>;

    /// Return cached allocator blocks to the device.
    async fn release_cached_memory(&self) -> PipelineResult<()> {
        Ok(())
    }
}

/// Builds a model from configuration. Called at most once per successful load.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, config: &PipelineConfig) -> PipelineResult<Arc<dyn TextToVideoModel>>;
}

/// Loader for the configured backend.
pub fn loader_for(config: &PipelineConfig) -> PipelineResult<Box<dyn ModelLoader>> {
    match config.backend {
        RuntimeBackend::Sidecar => Ok(Box::new(SidecarLoader::new(config)?)),
        RuntimeBackend::Preview => Ok(Box::new(PreviewLoader)),
    }
}
