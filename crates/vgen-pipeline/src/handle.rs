//! Process-wide model handle.
//!
//! The model is loaded on first use and kept for the life of the process.
//! Concurrent first callers wait on a single load; a failed load leaves the
//! handle empty so the next caller tries again. Generation runs one at a
//! time since a single model occupies the device.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, error, info, warn};
use vgen_models::{GenerationRequest, MemoryStats};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::export::export_to_video;
use crate::model::{loader_for, ModelLoader, TextToVideoModel};

/// Result of one generation.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Path of the exported MP4
    pub path: PathBuf,
    pub num_frames: u32,
    /// Time spent in the model and export
    pub generation_time: Duration,
}

/// Lazily loaded, shared text-to-video pipeline.
pub struct PipelineHandle {
    config: PipelineConfig,
    loader: Box<dyn ModelLoader>,
    model: OnceCell<Arc<dyn TextToVideoModel>>,
    generation_permit: Semaphore,
}

impl PipelineHandle {
    /// Create a handle for the configured backend. Nothing is loaded yet.
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        let loader = loader_for(&config)?;
        Ok(Self::with_loader(config, loader))
    }

    /// Create a handle with an explicit loader.
    pub fn with_loader(config: PipelineConfig, loader: Box<dyn ModelLoader>) -> Self {
        Self {
            config,
            loader,
            model: OnceCell::new(),
            generation_permit: Semaphore::new(1),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// Return the loaded model, loading it on first use.
    pub async fn get_pipeline(&self) -> PipelineResult<Arc<dyn TextToVideoModel>> {
        let model = self
            .model
            .get_or_try_init(|| async {
                info!(
                    backend = %self.config.backend,
                    model_id = %self.config.model_id,
                    "Loading model pipeline..."
                );
                let start = Instant::now();

                match self.loader.load(&self.config).await {
                    Ok(model) => {
                        let elapsed = start.elapsed();
                        metrics::histogram!("vgen_model_load_duration_seconds")
                            .record(elapsed.as_secs_f64());
                        info!(
                            load_time_secs = elapsed.as_secs_f64(),
                            "Model pipeline loaded successfully!"
                        );
                        Ok(model)
                    }
                    Err(e) => {
                        metrics::counter!("vgen_model_load_failures_total").increment(1);
                        error!("Failed to load model pipeline: {}", e);
                        Err(e)
                    }
                }
            })
            .await?;

        Ok(Arc::clone(model))
    }

    /// Memory stats from the loaded model, or "unavailable" before load.
    pub async fn memory_stats(&self) -> PipelineResult<MemoryStats> {
        match self.model.get() {
            Some(model) => model.memory_stats().await,
            None => Ok(MemoryStats::unavailable()),
        }
    }

    /// Generate a clip for `request` and export it as MP4 to `output`.
    pub async fn generate_video(
        &self,
        request: &GenerationRequest,
        output: &Path,
    ) -> PipelineResult<GenerationOutput> {
        request.validate_all()?;
        let params = request.to_params(&self.config.defaults);

        let model = self.get_pipeline().await?;

        let _permit = self
            .generation_permit
            .acquire()
            .await
            .map_err(|_| PipelineError::internal("generation semaphore closed"))?;

        info!("Generating video with {} frames", params.num_frames);
        let start = Instant::now();

        let result = async {
            let frames = model.generate(&params).await?;
            export_to_video(&frames, output, params.fps, self.config.export_timeout).await?;
            Ok::<_, PipelineError>(frames.num_frames())
        }
        .await;

        let generation_time = start.elapsed();
        let status = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!("vgen_generations_total", "backend" => model.name().to_string(), "status" => status)
            .increment(1);

        let num_frames = result?;
        metrics::histogram!("vgen_generation_duration_seconds", "backend" => model.name().to_string())
            .record(generation_time.as_secs_f64());
        info!(
            generation_time_secs = generation_time.as_secs_f64(),
            "Video saved to {}",
            output.display()
        );

        self.release_memory_if_needed(model.as_ref()).await;

        Ok(GenerationOutput {
            path: output.to_path_buf(),
            num_frames,
            generation_time,
        })
    }

    async fn release_memory_if_needed(&self, model: &dyn TextToVideoModel) {
        let stats = match model.memory_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                debug!("Memory stats unavailable after generation: {}", e);
                return;
            }
        };

        if stats.gpu_available && stats.reserved_fraction() > self.config.cuda.clear_cache_threshold {
            info!(
                reserved_gb = stats.reserved_gb,
                total_gb = stats.total_gb,
                "Reserved memory above threshold, releasing cached blocks"
            );
            if let Err(e) = model.release_cached_memory().await {
                warn!("Failed to release cached memory: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::VideoFrames;
    use crate::preview::PreviewModel;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vgen_models::GenerationParams;

    /// Loader that counts calls and fails the first `failures` of them.
    struct CountingLoader {
        calls: Arc<AtomicUsize>,
        failures: usize,
    }

    #[async_trait]
    impl ModelLoader for CountingLoader {
        async fn load(&self, _config: &PipelineConfig) -> PipelineResult<Arc<dyn TextToVideoModel>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if call < self.failures {
                return Err(PipelineError::load_failed("weights missing"));
            }
            Ok(Arc::new(PreviewModel))
        }
    }

    /// Model that always fails to generate.
    struct BrokenModel;

    #[async_trait]
    impl TextToVideoModel for BrokenModel {
        fn name(&self) -> &str {
            "broken"
        }

        async fn generate(&self, _params: &GenerationParams) -> PipelineResult<VideoFrames> {
            Err(PipelineError::RuntimeUnavailable("CUDA out of memory".to_string()))
        }

        async fn memory_stats(&self) -> PipelineResult<MemoryStats> {
            Ok(MemoryStats::unavailable())
        }
    }

    struct BrokenLoader;

    #[async_trait]
    impl ModelLoader for BrokenLoader {
        async fn load(&self, _config: &PipelineConfig) -> PipelineResult<Arc<dyn TextToVideoModel>> {
            Ok(Arc::new(BrokenModel))
        }
    }

    fn counting_handle(failures: usize) -> (Arc<PipelineHandle>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = CountingLoader {
            calls: Arc::clone(&calls),
            failures,
        };
        let handle = PipelineHandle::with_loader(PipelineConfig::preview(), Box::new(loader));
        (Arc::new(handle), calls)
    }

    #[tokio::test]
    async fn test_concurrent_first_use_loads_once() {
        let (handle, calls) = counting_handle(0);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handle = Arc::clone(&handle);
                tokio::spawn(async move { handle.get_pipeline().await.map(|m| m.name().to_string()) })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "preview");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handle.is_loaded());
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let (handle, calls) = counting_handle(1);

        assert!(handle.get_pipeline().await.is_err());
        assert!(!handle.is_loaded());

        assert!(handle.get_pipeline().await.is_ok());
        assert!(handle.is_loaded());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_memory_stats_before_load() {
        let (handle, calls) = counting_handle(0);
        let stats = handle.memory_stats().await.unwrap();
        assert!(!stats.gpu_available);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_skips_load() {
        let (handle, calls) = counting_handle(0);
        let request = GenerationRequest::new("a cat", "").with_size(100, 720);

        let err = handle
            .generate_video(&request, Path::new("unused.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generation_error_propagates() {
        let handle = PipelineHandle::with_loader(PipelineConfig::preview(), Box::new(BrokenLoader));
        let request = GenerationRequest::new("a cat", "").with_size(64, 64);

        let err = handle
            .generate_video(&request, Path::new("unused.mp4"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CUDA out of memory"));
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_generate_video_with_preview_backend() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("output_test.mp4");
        let handle = PipelineHandle::new(PipelineConfig::preview()).unwrap();
        let request = GenerationRequest::new("A beautiful sunset over the ocean", "blurry")
            .with_size(128, 64)
            .with_seconds(1.0);

        let result = handle.generate_video(&request, &output).await.unwrap();
        assert_eq!(result.num_frames, 25);
        assert!(output.exists());
    }
}
