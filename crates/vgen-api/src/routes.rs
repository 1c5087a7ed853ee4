//! API routes.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{enqueue_job, enqueue_warm_up, generate_video, get_job, health, ready, root};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, redact_internal_errors, request_id, request_logging, security_headers,
    RateLimiterCache,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let rate_limiter = Arc::new(RateLimiterCache::new(
        state.config.rate_limit_rps,
        state.config.rate_limit_burst,
    ));

    // Generation and job submission are expensive, so they share a per-IP limit
    let limited_routes = Router::new()
        .route("/generate-video", post(generate_video))
        .route("/jobs", post(enqueue_job))
        .route("/jobs/warm-up", post(enqueue_warm_up))
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware));

    let job_routes = Router::new().route("/jobs/:job_id", get(get_job));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = match metrics_handle {
        Some(handle) => Router::new().route("/metrics", get(move || async move { handle.render() })),
        None => Router::new(),
    };

    Router::new()
        .route("/", get(root))
        .merge(limited_routes)
        .merge(job_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn_with_state(
            state.config.is_production(),
            redact_internal_errors,
        ))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use vgen_models::{GenerationParams, MemoryStats};
    use vgen_pipeline::{
        ModelLoader, PipelineConfig, PipelineError, PipelineHandle, PipelineResult, TextToVideoModel,
        VideoFrames,
    };

    struct UnavailableLoader;

    #[async_trait]
    impl ModelLoader for UnavailableLoader {
        async fn load(&self, _config: &PipelineConfig) -> PipelineResult<Arc<dyn TextToVideoModel>> {
            Err(PipelineError::load_failed("no CUDA device"))
        }
    }

    fn app_with(pipeline: PipelineHandle) -> Router {
        let state = AppState::with_pipeline(ApiConfig::default(), Arc::new(pipeline));
        create_router(state, None)
    }

    fn preview_app(output_dir: &std::path::Path) -> Router {
        let config = PipelineConfig {
            output_dir: output_dir.to_path_buf(),
            ..PipelineConfig::preview()
        };
        app_with(PipelineHandle::new(config).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_root_says_hello() {
        let dir = tempfile::tempdir().unwrap();
        let response = preview_app(dir.path()).oneshot(get("/")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(json_body(response).await, json!({"message": "Hello, World!"}));
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let response = preview_app(dir.path()).oneshot(get("/healthz")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ready_without_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let response = preview_app(dir.path()).oneshot(get("/ready")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["model"]["loaded"], false);
        assert_eq!(body["checks"]["redis"]["status"], "disabled");
    }

    struct StalledRuntime;

    #[async_trait]
    impl TextToVideoModel for StalledRuntime {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn generate(&self, _params: &GenerationParams) -> PipelineResult<VideoFrames> {
            Err(PipelineError::internal("not used"))
        }

        async fn memory_stats(&self) -> PipelineResult<MemoryStats> {
            std::future::pending().await
        }
    }

    struct StalledLoader;

    #[async_trait]
    impl ModelLoader for StalledLoader {
        async fn load(&self, _config: &PipelineConfig) -> PipelineResult<Arc<dyn TextToVideoModel>> {
            Ok(Arc::new(StalledRuntime))
        }
    }

    #[tokio::test]
    async fn test_ready_does_not_wait_on_stalled_runtime() {
        let pipeline = PipelineHandle::with_loader(PipelineConfig::preview(), Box::new(StalledLoader));
        pipeline.get_pipeline().await.unwrap();

        let response = tokio::time::timeout(
            crate::handlers::health::MODEL_STATS_TIMEOUT * 3,
            app_with(pipeline).oneshot(get("/ready")),
        )
        .await
        .expect("readiness check hung")
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["model"]["loaded"], true);
        assert_eq!(body["model"]["memory"]["gpu_available"], false);
    }

    #[tokio::test]
    async fn test_invalid_dimensions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let response = preview_app(dir.path())
            .oneshot(post_json(
                "/generate-video",
                json!({"prompt": "a cat", "negative_prompt": "", "width": 1001}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["detail"],
            "width must be a multiple of 8, got 1001"
        );
    }

    #[tokio::test]
    async fn test_generation_failure_returns_detail() {
        let app = app_with(PipelineHandle::with_loader(
            PipelineConfig::preview(),
            Box::new(UnavailableLoader),
        ));

        let response = app
            .oneshot(post_json(
                "/generate-video",
                json!({"prompt": "a cat", "negative_prompt": "blurry"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await["detail"],
            "Error generating video: Model load failed: no CUDA device"
        );
    }

    #[tokio::test]
    async fn test_jobs_need_a_queue() {
        let dir = tempfile::tempdir().unwrap();
        let app = preview_app(dir.path());

        let response = app
            .clone()
            .oneshot(post_json("/jobs", json!({"input": {"prompt": "a cat"}})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app.oneshot(get("/jobs/abc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_generate_returns_mp4() {
        let dir = tempfile::tempdir().unwrap();
        let response = preview_app(dir.path())
            .oneshot(post_json(
                "/generate-video",
                json!({
                    "prompt": "a sunset over the sea",
                    "negative_prompt": "",
                    "width": 320,
                    "height": 192,
                    "seconds": 1.0
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "video/mp4");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[4..8], b"ftyp");
    }
}
