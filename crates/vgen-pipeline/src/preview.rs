//! Synthetic backend that renders a moving gradient instead of running a model.
//!
//! Useful for exercising the serving path (export, upload, signing) on
//! machines without a GPU. Output depends only on the prompt and geometry.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use vgen_models::{GenerationParams, MemoryStats};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::frames::VideoFrames;
use crate::model::{ModelLoader, TextToVideoModel};

/// Loader for [`PreviewModel`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PreviewLoader;

#[async_trait]
impl ModelLoader for PreviewLoader {
    async fn load(&self, config: &PipelineConfig) -> PipelineResult<Arc<dyn TextToVideoModel>> {
        info!(model_id = %config.model_id, "Using preview backend, no model weights loaded");
        Ok(Arc::new(PreviewModel))
    }
}

/// Deterministic synthetic model.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreviewModel;

#[async_trait]
impl TextToVideoModel for PreviewModel {
    fn name(&self) -> &str {
        "preview"
    }

    async fn generate(&self, params: &GenerationParams) -> PipelineResult<VideoFrames> {
        let (width, height, num_frames) = (params.width, params.height, params.num_frames);
        let seed = prompt_seed(&params.prompt);

        let data = tokio::task::spawn_blocking(move || render(width, height, num_frames, seed))
            .await
            .map_err(|e| PipelineError::internal(format!("preview render task failed: {}", e)))?;

        VideoFrames::from_rgb24(width, height, num_frames, data)
    }

    async fn memory_stats(&self) -> PipelineResult<MemoryStats> {
        Ok(MemoryStats::unavailable())
    }
}

/// FNV-1a over the prompt bytes.
fn prompt_seed(prompt: &str) -> u64 {
    prompt.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

fn render(width: u32, height: u32, num_frames: u32, seed: u64) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut data = Vec::with_capacity(w * h * 3 * num_frames as usize);
    let base_r = (seed & 0xff) as usize;
    let base_g = ((seed >> 8) & 0xff) as usize;
    let base_b = ((seed >> 16) & 0xff) as usize;

    for frame in 0..num_frames as usize {
        let phase = frame * 4;
        for y in 0..h {
            let g = (base_g + y * 255 / h.max(1)) & 0xff;
            for x in 0..w {
                let r = (base_r + x * 255 / w.max(1) + phase) & 0xff;
                let b = (base_b + (x + y) / 8 + phase / 2) & 0xff;
                data.extend_from_slice(&[r as u8, g as u8, b as u8]);
            }
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgen_models::{GenerationDefaults, GenerationRequest};

    fn params(prompt: &str) -> GenerationParams {
        GenerationRequest::new(prompt, "")
            .with_size(32, 16)
            .with_seconds(0.25)
            .to_params(&GenerationDefaults::default())
    }

    #[tokio::test]
    async fn test_preview_frame_geometry() {
        let frames = PreviewModel.generate(&params("a cat")).await.unwrap();
        assert_eq!(frames.num_frames(), 7);
        assert_eq!(frames.as_bytes().len(), 32 * 16 * 3 * 7);
    }

    #[tokio::test]
    async fn test_preview_is_deterministic_per_prompt() {
        let a = PreviewModel.generate(&params("a cat")).await.unwrap();
        let b = PreviewModel.generate(&params("a cat")).await.unwrap();
        let c = PreviewModel.generate(&params("a dog")).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_preview_frames_move() {
        let frames = PreviewModel.generate(&params("sunset")).await.unwrap();
        assert_ne!(frames.frame(0), frames.frame(1));
    }

    #[tokio::test]
    async fn test_preview_reports_no_gpu() {
        let stats = PreviewModel.memory_stats().await.unwrap();
        assert!(!stats.gpu_available);
    }
}
