//! HTTP client for the diffusion runtime sidecar.
//!
//! The runtime process owns the GPU and the pretrained weights. This module
//! drives it: load the pipeline with dtype/variant fallbacks, apply
//! optimizations best-effort, run generations and read memory stats.
//!
//! Endpoints:
//! - `GET  /health`
//! - `POST /v1/pipeline/load`            load weights
//! - `POST /v1/pipeline/optimizations`   enable one optimization or apply CUDA settings
//! - `POST /v1/pipeline/generate`        rgb24 frames as octet-stream
//! - `GET  /v1/memory`                   memory stats
//! - `POST /v1/memory/empty-cache`       release cached allocator blocks

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;
use vgen_models::{GenerationParams, MemoryStats};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::frames::VideoFrames;
use crate::model::{ModelLoader, TextToVideoModel};

const HEADER_FRAME_COUNT: &str = "x-frame-count";
const HEADER_FRAME_WIDTH: &str = "x-frame-width";
const HEADER_FRAME_HEIGHT: &str = "x-frame-height";

/// Body of a load call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadRequest {
    pub model_id: String,
    pub torch_dtype: String,
    pub vae_dtype: String,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_safetensors: Option<bool>,
}

impl LoadRequest {
    /// Load attempts in order: fp16 safetensors, plain safetensors, runtime defaults.
    pub fn attempts(config: &PipelineConfig) -> Vec<LoadRequest> {
        let base = LoadRequest {
            model_id: config.model_id.clone(),
            torch_dtype: config.torch_dtype.clone(),
            vae_dtype: config.vae_dtype.clone(),
            device: config.device.clone(),
            variant: None,
            use_safetensors: None,
        };

        vec![
            LoadRequest {
                variant: Some("fp16".to_string()),
                use_safetensors: Some(true),
                ..base.clone()
            },
            LoadRequest {
                use_safetensors: Some(true),
                ..base.clone()
            },
            base,
        ]
    }

    fn describe(&self) -> &'static str {
        match (&self.variant, self.use_safetensors) {
            (Some(_), _) => "fp16 variant",
            (None, Some(true)) => "safetensors without variant",
            _ => "default settings",
        }
    }
}

/// Body of an optimization call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationRequest {
    pub name: &'static str,
    pub options: serde_json::Value,
}

impl OptimizationRequest {
    /// Enabled optimizations in the order they are applied, CUDA settings last.
    pub fn enabled(config: &PipelineConfig) -> Vec<OptimizationRequest> {
        let opts = &config.optimizations;
        let mut requests = Vec::new();

        if opts.enable_model_cpu_offload {
            requests.push(Self::flag("model_cpu_offload"));
        }
        if opts.enable_attention_slicing {
            requests.push(Self::flag("attention_slicing"));
        }
        if opts.enable_vae_slicing {
            requests.push(Self::flag("vae_slicing"));
        }
        if opts.enable_xformers {
            requests.push(Self::flag("xformers_memory_efficient_attention"));
        }
        if opts.enable_torch_compile {
            requests.push(OptimizationRequest {
                name: "torch_compile",
                options: json!(config.compile),
            });
        }
        requests.push(OptimizationRequest {
            name: "cuda_settings",
            options: json!(config.cuda),
        });

        requests
    }

    fn flag(name: &'static str) -> Self {
        Self {
            name,
            options: json!({}),
        }
    }
}

/// Shared HTTP plumbing for loader and model.
#[derive(Debug, Clone)]
struct SidecarClient {
    http: Client,
    base_url: Url,
    max_retries: u32,
    load_timeout: Duration,
}

impl SidecarClient {
    fn new(config: &PipelineConfig) -> PipelineResult<Self> {
        let mut raw = config.runtime_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw)
            .map_err(|e| PipelineError::config(format!("invalid runtime URL '{}': {}", raw, e)))?;

        let http = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            http,
            base_url,
            max_retries: config.max_retries,
            load_timeout: config.load_timeout,
        })
    }

    fn endpoint(&self, path: &str) -> PipelineResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| PipelineError::config(format!("invalid endpoint '{}': {}", path, e)))
    }

    async fn health_check(&self) -> bool {
        let Ok(url) = self.endpoint("health") else {
            return false;
        };

        match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("Diffusion runtime health check failed: {}", response.status());
                false
            }
            Err(e) => {
                warn!("Diffusion runtime health check error: {}", e);
                false
            }
        }
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> PipelineResult<Response> {
        let url = self.endpoint(path)?;
        self.with_retry(|| async {
            let mut request = self.http.post(url.clone()).json(body);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }
            let response = request.send().await?;
            check_status(response).await
        })
        .await
    }

    async fn get(&self, path: &str) -> PipelineResult<Response> {
        let url = self.endpoint(path)?;
        self.with_retry(|| async {
            let response = self.http.get(url.clone()).send().await?;
            check_status(response).await
        })
        .await
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> PipelineResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "Runtime request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn check_status(response: Response) -> PipelineResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        return Err(PipelineError::RuntimeUnavailable(format!("{}: {}", status, body)));
    }
    Err(PipelineError::RuntimeRejected {
        status: status.as_u16(),
        body,
    })
}

/// Loads the pipeline inside the diffusion runtime.
pub struct SidecarLoader {
    client: SidecarClient,
}

impl SidecarLoader {
    pub fn new(config: &PipelineConfig) -> PipelineResult<Self> {
        Ok(Self {
            client: SidecarClient::new(config)?,
        })
    }

    async fn load_weights(&self, config: &PipelineConfig) -> PipelineResult<()> {
        let mut last_error = None;

        for attempt in LoadRequest::attempts(config) {
            info!(model_id = %attempt.model_id, "Loading pipeline with {}", attempt.describe());
            match self
                .client
                .post_json("v1/pipeline/load", &attempt, Some(self.client.load_timeout))
                .await
            {
                Ok(_) => {
                    info!("Pipeline loaded with {}", attempt.describe());
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to load pipeline with {}: {}", attempt.describe(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(PipelineError::load_failed(
            last_error.map(|e| e.to_string()).unwrap_or_else(|| "no load attempts".to_string()),
        ))
    }
}

#[async_trait]
impl ModelLoader for SidecarLoader {
    async fn load(&self, config: &PipelineConfig) -> PipelineResult<Arc<dyn TextToVideoModel>> {
        if !self.client.health_check().await {
            warn!("Diffusion runtime did not report healthy, attempting load anyway");
        }

        self.load_weights(config).await?;

        for optimization in OptimizationRequest::enabled(config) {
            match self
                .client
                .post_json("v1/pipeline/optimizations", &optimization, Some(self.client.load_timeout))
                .await
            {
                Ok(_) => info!("Enabled {}", optimization.name),
                Err(e) => warn!("Could not enable {}: {}", optimization.name, e),
            }
        }

        Ok(Arc::new(SidecarModel {
            client: self.client.clone(),
        }))
    }
}

/// A pipeline resident in the diffusion runtime.
pub struct SidecarModel {
    client: SidecarClient,
}

#[async_trait]
impl TextToVideoModel for SidecarModel {
    fn name(&self) -> &str {
        "sidecar"
    }

    async fn generate(&self, params: &GenerationParams) -> PipelineResult<VideoFrames> {
        debug!(
            width = params.width,
            height = params.height,
            num_frames = params.num_frames,
            "Sending generation request to runtime"
        );

        let response = self.client.post_json("v1/pipeline/generate", params, None).await?;

        let width = header_u32(&response, HEADER_FRAME_WIDTH)?.unwrap_or(params.width);
        let height = header_u32(&response, HEADER_FRAME_HEIGHT)?.unwrap_or(params.height);
        let num_frames = header_u32(&response, HEADER_FRAME_COUNT)?.unwrap_or(params.num_frames);

        let bytes = response.bytes().await?;
        VideoFrames::from_rgb24(width, height, num_frames, bytes)
    }

    async fn memory_stats(&self) -> PipelineResult<MemoryStats> {
        let response = self.client.get("v1/memory").await?;
        let stats = response
            .json::<MemoryStats>()
            .await
            .map_err(|e| PipelineError::invalid_response(format!("memory stats: {}", e)))?;
        Ok(stats)
    }

    async fn release_cached_memory(&self) -> PipelineResult<()> {
        self.client
            .post_json("v1/memory/empty-cache", &json!({}), None)
            .await?;
        Ok(())
    }
}

fn header_u32(response: &Response, name: &str) -> PipelineResult<Option<u32>> {
    match response.headers().get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .map(Some)
            .ok_or_else(|| PipelineError::invalid_response(format!("bad {} header", name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgen_models::{GenerationDefaults, GenerationRequest};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> PipelineConfig {
        PipelineConfig {
            runtime_url: server.uri(),
            max_retries: 0,
            ..PipelineConfig::default()
        }
    }

    async fn mount_ok(server: &MockServer, verb: &str, route: &str) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(server)
            .await;
    }

    #[test]
    fn test_load_attempt_order() {
        let attempts = LoadRequest::attempts(&PipelineConfig::default());
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0].variant.as_deref(), Some("fp16"));
        assert_eq!(attempts[1].variant, None);
        assert_eq!(attempts[1].use_safetensors, Some(true));
        assert_eq!(attempts[2].use_safetensors, None);
    }

    #[test]
    fn test_enabled_optimizations_follow_flags() {
        let mut config = PipelineConfig::default();
        let names: Vec<_> = OptimizationRequest::enabled(&config).iter().map(|o| o.name).collect();
        assert_eq!(
            names,
            vec![
                "model_cpu_offload",
                "attention_slicing",
                "vae_slicing",
                "xformers_memory_efficient_attention",
                "torch_compile",
                "cuda_settings"
            ]
        );

        config.optimizations.enable_torch_compile = false;
        config.optimizations.enable_xformers = false;
        let enabled = OptimizationRequest::enabled(&config);
        assert_eq!(enabled.len(), 4);
        assert_eq!(enabled[3].options["max_split_size_mb"], 512);
    }

    #[tokio::test]
    async fn test_load_falls_back_and_ignores_rejected_optimizations() {
        let server = MockServer::start().await;

        mount_ok(&server, "GET", "/health").await;

        Mock::given(method("POST"))
            .and(path("/v1/pipeline/load"))
            .and(body_partial_json(json!({"variant": "fp16"})))
            .respond_with(ResponseTemplate::new(404).set_body_string("variant not found"))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/pipeline/load"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/pipeline/optimizations"))
            .and(body_partial_json(json!({"name": "xformers_memory_efficient_attention"})))
            .respond_with(ResponseTemplate::new(422).set_body_string("xformers not installed"))
            .with_priority(1)
            .mount(&server)
            .await;
        mount_ok(&server, "POST", "/v1/pipeline/optimizations").await;

        let config = config_for(&server);
        let loader = SidecarLoader::new(&config).unwrap();
        let model = loader.load(&config).await.unwrap();
        assert_eq!(model.name(), "sidecar");
    }

    #[tokio::test]
    async fn test_load_fails_after_all_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/pipeline/load"))
            .respond_with(ResponseTemplate::new(500).set_body_string("out of memory"))
            .expect(3)
            .mount(&server)
            .await;

        let config = config_for(&server);
        let loader = SidecarLoader::new(&config).unwrap();
        let err = loader.load(&config).await.err().unwrap();
        assert!(matches!(err, PipelineError::LoadFailed(ref msg) if msg.contains("out of memory")));
    }

    #[tokio::test]
    async fn test_generate_reads_frames() {
        let server = MockServer::start().await;
        let frame_bytes = vec![9u8; 16 * 16 * 3 * 2];

        Mock::given(method("POST"))
            .and(path("/v1/pipeline/generate"))
            .and(body_partial_json(json!({"prompt": "a cat", "num_frames": 2})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(HEADER_FRAME_COUNT, "2")
                    .insert_header(HEADER_FRAME_WIDTH, "16")
                    .insert_header(HEADER_FRAME_HEIGHT, "16")
                    .set_body_bytes(frame_bytes),
            )
            .mount(&server)
            .await;

        let model = SidecarModel {
            client: SidecarClient::new(&config_for(&server)).unwrap(),
        };
        let mut params = GenerationRequest::new("a cat", "")
            .with_size(16, 16)
            .to_params(&GenerationDefaults::default());
        params.num_frames = 2;

        let frames = model.generate(&params).await.unwrap();
        assert_eq!(frames.num_frames(), 2);
        assert_eq!(frames.width(), 16);
        assert!(frames.as_bytes().iter().all(|b| *b == 9));
    }

    #[tokio::test]
    async fn test_generate_rejects_short_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/pipeline/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 10]))
            .mount(&server)
            .await;

        let model = SidecarModel {
            client: SidecarClient::new(&config_for(&server)).unwrap(),
        };
        let params = GenerationRequest::new("a cat", "")
            .with_size(16, 16)
            .to_params(&GenerationDefaults::default());

        let err = model.generate(&params).await.err().unwrap();
        assert!(matches!(err, PipelineError::InvalidFrames(_)));
    }

    #[tokio::test]
    async fn test_memory_stats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/memory"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "gpu_available": true,
                "device_name": "NVIDIA A100-SXM4-80GB",
                "allocated_gb": 41.2,
                "reserved_gb": 52.0,
                "max_allocated_gb": 70.3,
                "total_gb": 80.0
            })))
            .mount(&server)
            .await;

        let model = SidecarModel {
            client: SidecarClient::new(&config_for(&server)).unwrap(),
        };
        let stats = model.memory_stats().await.unwrap();
        assert!(stats.gpu_available);
        assert_eq!(stats.total_gb, 80.0);
    }

    #[tokio::test]
    async fn test_unavailable_runtime_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/memory"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let config = PipelineConfig {
            max_retries: 1,
            ..config_for(&server)
        };
        let model = SidecarModel {
            client: SidecarClient::new(&config).unwrap(),
        };
        let err = model.memory_stats().await.err().unwrap();
        assert!(matches!(err, PipelineError::RuntimeUnavailable(_)));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_client_errors_are_not() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/pipeline/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("CUDA error"))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/memory"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let config = PipelineConfig {
            max_retries: 1,
            ..config_for(&server)
        };
        let model = SidecarModel {
            client: SidecarClient::new(&config).unwrap(),
        };

        let params = GenerationRequest::new("a cat", "")
            .with_size(16, 16)
            .to_params(&config.defaults);
        let err = model.generate(&params).await.err().unwrap();
        assert!(matches!(err, PipelineError::RuntimeUnavailable(ref msg) if msg.contains("CUDA error")));

        let err = model.memory_stats().await.err().unwrap();
        assert!(matches!(err, PipelineError::RuntimeRejected { status: 422, .. }));
    }
}
