//! Model warm-up run at container start.

use std::time::{Duration, Instant};

use tracing::{info, warn};
use vgen_models::{output_file_name, GenerationRequest, MemoryStats};

use crate::error::PipelineResult;
use crate::handle::PipelineHandle;

const TEST_PROMPT: &str = "A beautiful sunset over the ocean";
const TEST_NEGATIVE_PROMPT: &str = "blurry, low quality";
const TEST_WIDTH: u32 = 640;
const TEST_HEIGHT: u32 = 360;
/// One second at 24 fps gives 25 frames.
const TEST_SECONDS: f64 = 1.0;

/// Outcome of [`warm_up`].
#[derive(Debug, Clone)]
pub struct WarmUpReport {
    pub load_time: Duration,
    pub memory_stats: MemoryStats,
    /// `None` when no test generation was requested
    pub test_generation: Option<bool>,
}

/// Load the model and optionally run a small test generation.
///
/// A load failure is returned; a failed test generation is only logged.
/// The test generation is skipped when a GPU backend reports no device.
pub async fn warm_up(handle: &PipelineHandle, test_generation: bool) -> PipelineResult<WarmUpReport> {
    info!("Starting model initialization...");
    let start = Instant::now();
    handle.get_pipeline().await?;
    let load_time = start.elapsed();
    info!("Model loaded in {:.2} seconds", load_time.as_secs_f64());

    let memory_stats = handle.memory_stats().await.unwrap_or_else(|e| {
        warn!("Could not read memory stats: {}", e);
        MemoryStats::unavailable()
    });
    if memory_stats.gpu_available {
        info!(
            device = memory_stats.device_name.as_deref().unwrap_or("unknown"),
            allocated_gb = memory_stats.allocated_gb,
            reserved_gb = memory_stats.reserved_gb,
            total_gb = memory_stats.total_gb,
            "GPU memory after load"
        );
    } else {
        info!("No GPU reported by runtime");
    }

    let test_generation = if !test_generation {
        None
    } else if handle.config().backend.needs_gpu() && !memory_stats.gpu_available {
        warn!("CUDA not available, skipping test generation");
        None
    } else {
        Some(run_test_generation(handle).await)
    };

    Ok(WarmUpReport {
        load_time,
        memory_stats,
        test_generation,
    })
}

async fn run_test_generation(handle: &PipelineHandle) -> bool {
    info!("Running test generation...");
    let request = GenerationRequest::new(TEST_PROMPT, TEST_NEGATIVE_PROMPT)
        .with_size(TEST_WIDTH, TEST_HEIGHT)
        .with_seconds(TEST_SECONDS);
    let output = std::env::temp_dir().join(output_file_name());

    let passed = match handle.generate_video(&request, &output).await {
        Ok(result) => {
            info!(
                "Test generation completed in {:.2} seconds ({} frames)",
                result.generation_time.as_secs_f64(),
                result.num_frames
            );
            true
        }
        Err(e) => {
            warn!("Test generation failed: {}", e);
            false
        }
    };

    if let Err(e) = tokio::fs::remove_file(&output).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove test output {}: {}", output.display(), e);
        }
    }

    passed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::frames::VideoFrames;
    use crate::model::{ModelLoader, TextToVideoModel};
    use crate::PipelineError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use vgen_models::GenerationParams;

    struct CpuOnlyRuntime {
        generations: Arc<AtomicU32>,
    }

    #[async_trait]
    impl TextToVideoModel for CpuOnlyRuntime {
        fn name(&self) -> &str {
            "cpu-only"
        }

        async fn generate(&self, _params: &GenerationParams) -> PipelineResult<VideoFrames> {
            self.generations.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::internal("no device"))
        }

        async fn memory_stats(&self) -> PipelineResult<MemoryStats> {
            Ok(MemoryStats::unavailable())
        }
    }

    struct CpuOnlyLoader(Arc<AtomicU32>);

    #[async_trait]
    impl ModelLoader for CpuOnlyLoader {
        async fn load(&self, _config: &PipelineConfig) -> PipelineResult<Arc<dyn TextToVideoModel>> {
            Ok(Arc::new(CpuOnlyRuntime {
                generations: Arc::clone(&self.0),
            }))
        }
    }

    #[tokio::test]
    async fn test_test_generation_skipped_without_gpu() {
        let generations = Arc::new(AtomicU32::new(0));
        let handle = PipelineHandle::with_loader(
            PipelineConfig::default(),
            Box::new(CpuOnlyLoader(Arc::clone(&generations))),
        );

        let report = warm_up(&handle, true).await.unwrap();

        assert!(handle.is_loaded());
        assert_eq!(report.test_generation, None);
        assert_eq!(generations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_warm_up_without_test_generation() {
        let handle = PipelineHandle::new(PipelineConfig::preview()).unwrap();
        let report = warm_up(&handle, false).await.unwrap();

        assert!(handle.is_loaded());
        assert!(!report.memory_stats.gpu_available);
        assert_eq!(report.test_generation, None);
    }

    #[test]
    fn test_generation_shape() {
        let request = GenerationRequest::new(TEST_PROMPT, TEST_NEGATIVE_PROMPT)
            .with_size(TEST_WIDTH, TEST_HEIGHT)
            .with_seconds(TEST_SECONDS);
        assert!(request.validate_all().is_ok());
        assert_eq!(vgen_models::num_frames(24, request.seconds), 25);
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_warm_up_with_test_generation() {
        let handle = PipelineHandle::new(PipelineConfig::preview()).unwrap();
        let report = warm_up(&handle, true).await.unwrap();
        assert_eq!(report.test_generation, Some(true));
    }
}
