//! Pipeline configuration.
//!
//! Defaults target a single 80GB GPU running the 14B Wan 2.1 text-to-video
//! model in bfloat16.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use vgen_models::GenerationDefaults;

use crate::error::PipelineError;

/// Which runtime executes the diffusion model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeBackend {
    /// External diffusion runtime reached over HTTP
    #[default]
    Sidecar,
    /// Synthetic frames, no model (local development and tests)
    Preview,
}

impl RuntimeBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeBackend::Sidecar => "sidecar",
            RuntimeBackend::Preview => "preview",
        }
    }

    /// Whether generation is only meaningful on a CUDA device.
    pub fn needs_gpu(&self) -> bool {
        matches!(self, RuntimeBackend::Sidecar)
    }
}

impl fmt::Display for RuntimeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeBackend {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sidecar" | "runtime" => Ok(RuntimeBackend::Sidecar),
            "preview" | "synthetic" => Ok(RuntimeBackend::Preview),
            other => Err(PipelineError::config(format!(
                "unknown pipeline backend '{}'",
                other
            ))),
        }
    }
}

/// Memory and speed optimizations applied after the model is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizationConfig {
    pub enable_model_cpu_offload: bool,
    pub enable_attention_slicing: bool,
    pub enable_vae_slicing: bool,
    pub enable_xformers: bool,
    pub enable_torch_compile: bool,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            enable_model_cpu_offload: true,
            enable_attention_slicing: true,
            enable_vae_slicing: true,
            enable_xformers: true,
            enable_torch_compile: true,
        }
    }
}

/// Graph compilation options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileConfig {
    pub mode: String,
    pub fullgraph: bool,
    pub dynamic: bool,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            mode: "reduce-overhead".to_string(),
            fullgraph: true,
            dynamic: false,
        }
    }
}

/// CUDA backend and allocator settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CudaConfig {
    pub allow_tf32: bool,
    pub cudnn_benchmark: bool,
    pub cudnn_deterministic: bool,
    pub max_split_size_mb: u32,
    pub expandable_segments: bool,
    pub memory_fraction: f64,
    /// Release cached allocator blocks once reserved memory passes this fraction
    #[serde(skip)]
    pub clear_cache_threshold: f64,
}

impl Default for CudaConfig {
    fn default() -> Self {
        Self {
            allow_tf32: true,
            cudnn_benchmark: true,
            cudnn_deterministic: false,
            max_split_size_mb: 512,
            expandable_segments: true,
            memory_fraction: 0.95,
            clear_cache_threshold: 0.8,
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Runtime backend
    pub backend: RuntimeBackend,
    /// Pretrained model identifier
    pub model_id: String,
    /// Dtype for the transformer and text encoder
    pub torch_dtype: String,
    /// Dtype for the VAE
    pub vae_dtype: String,
    /// Device the pipeline is placed on
    pub device: String,
    /// Base URL of the diffusion runtime
    pub runtime_url: String,
    /// Timeout for a single generation call
    pub request_timeout: Duration,
    /// Timeout for model load calls
    pub load_timeout: Duration,
    /// Max retries for retryable runtime errors
    pub max_retries: u32,
    pub optimizations: OptimizationConfig,
    pub compile: CompileConfig,
    pub cuda: CudaConfig,
    /// Sampling defaults applied to every request
    pub defaults: GenerationDefaults,
    /// FFmpeg export timeout
    pub export_timeout: Duration,
    /// Directory for HTTP-path output files
    pub output_dir: PathBuf,
    /// Remove output files once they have been served or uploaded
    pub cleanup_outputs: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend: RuntimeBackend::default(),
            model_id: "Wan-AI/Wan2.1-T2V-14B-Diffusers".to_string(),
            torch_dtype: "bfloat16".to_string(),
            vae_dtype: "float32".to_string(),
            device: "cuda".to_string(),
            runtime_url: "http://localhost:8001".to_string(),
            request_timeout: Duration::from_secs(1800),
            load_timeout: Duration::from_secs(1800),
            max_retries: 2,
            optimizations: OptimizationConfig::default(),
            compile: CompileConfig::default(),
            cuda: CudaConfig::default(),
            defaults: GenerationDefaults::default(),
            export_timeout: Duration::from_secs(300),
            output_dir: PathBuf::from("."),
            cleanup_outputs: false,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, PipelineError> {
        let base = Self::default();

        let backend = match std::env::var("PIPELINE_BACKEND") {
            Ok(v) => v.parse()?,
            Err(_) => base.backend,
        };

        Ok(Self {
            backend,
            model_id: std::env::var("MODEL_ID").unwrap_or(base.model_id),
            torch_dtype: std::env::var("TORCH_DTYPE").unwrap_or(base.torch_dtype),
            vae_dtype: std::env::var("VAE_DTYPE").unwrap_or(base.vae_dtype),
            device: std::env::var("PIPELINE_DEVICE").unwrap_or(base.device),
            runtime_url: std::env::var("DIFFUSION_RUNTIME_URL").unwrap_or(base.runtime_url),
            request_timeout: Duration::from_secs(env_parse(
                "DIFFUSION_RUNTIME_TIMEOUT",
                base.request_timeout.as_secs(),
            )),
            load_timeout: Duration::from_secs(env_parse(
                "DIFFUSION_RUNTIME_LOAD_TIMEOUT",
                base.load_timeout.as_secs(),
            )),
            max_retries: env_parse("DIFFUSION_RUNTIME_RETRIES", base.max_retries),
            optimizations: OptimizationConfig {
                enable_model_cpu_offload: env_flag(
                    "ENABLE_MODEL_CPU_OFFLOAD",
                    base.optimizations.enable_model_cpu_offload,
                ),
                enable_attention_slicing: env_flag(
                    "ENABLE_ATTENTION_SLICING",
                    base.optimizations.enable_attention_slicing,
                ),
                enable_vae_slicing: env_flag(
                    "ENABLE_VAE_SLICING",
                    base.optimizations.enable_vae_slicing,
                ),
                enable_xformers: env_flag("ENABLE_XFORMERS", base.optimizations.enable_xformers),
                enable_torch_compile: env_flag(
                    "ENABLE_TORCH_COMPILE",
                    base.optimizations.enable_torch_compile,
                ),
            },
            compile: base.compile,
            cuda: CudaConfig {
                allow_tf32: env_flag("ALLOW_TF32", base.cuda.allow_tf32),
                cudnn_benchmark: env_flag("CUDNN_BENCHMARK", base.cuda.cudnn_benchmark),
                cudnn_deterministic: env_flag("CUDNN_DETERMINISTIC", base.cuda.cudnn_deterministic),
                clear_cache_threshold: env_parse(
                    "CLEAR_CUDA_CACHE_THRESHOLD",
                    base.cuda.clear_cache_threshold,
                ),
                ..base.cuda
            },
            defaults: vgen_models::GenerationDefaults {
                num_inference_steps: env_parse(
                    "NUM_INFERENCE_STEPS",
                    base.defaults.num_inference_steps,
                ),
                guidance_scale: env_parse("GUIDANCE_SCALE", base.defaults.guidance_scale),
                ..base.defaults
            },
            export_timeout: Duration::from_secs(env_parse(
                "EXPORT_TIMEOUT",
                base.export_timeout.as_secs(),
            )),
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(base.output_dir),
            cleanup_outputs: env_flag("OUTPUT_CLEANUP", base.cleanup_outputs),
        })
    }

    /// Config for the synthetic backend.
    pub fn preview() -> Self {
        Self {
            backend: RuntimeBackend::Preview,
            ..Self::default()
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.model_id, "Wan-AI/Wan2.1-T2V-14B-Diffusers");
        assert_eq!(config.torch_dtype, "bfloat16");
        assert_eq!(config.vae_dtype, "float32");
        assert_eq!(config.defaults.fps, 24);
        assert_eq!(config.defaults.num_inference_steps, 20);
        assert_eq!(config.cuda.max_split_size_mb, 512);
        assert_eq!(config.compile.mode, "reduce-overhead");
        assert!(!config.cleanup_outputs);
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("preview".parse::<RuntimeBackend>().unwrap(), RuntimeBackend::Preview);
        assert_eq!("Sidecar".parse::<RuntimeBackend>().unwrap(), RuntimeBackend::Sidecar);
        assert!("torch".parse::<RuntimeBackend>().is_err());
    }

    #[test]
    fn test_cuda_config_serialization_skips_threshold() {
        let value = serde_json::to_value(CudaConfig::default()).unwrap();
        assert!(value.get("clear_cache_threshold").is_none());
        assert_eq!(value["memory_fraction"], 0.95);
    }
}
