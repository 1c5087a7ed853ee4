//! Application state.

use std::sync::Arc;

use tracing::{info, warn};
use vgen_pipeline::{PipelineConfig, PipelineHandle};
use vgen_queue::{JobQueue, JobResultStore, QueueConfig};
use vgen_storage::StorageClient;

use crate::config::ApiConfig;

/// Shared application state.
///
/// The queue side is optional: without `REDIS_URL` the server only offers
/// synchronous generation.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub pipeline: Arc<PipelineHandle>,
    pub queue: Option<Arc<JobQueue>>,
    pub results: Option<Arc<JobResultStore>>,
    pub storage: Option<Arc<StorageClient>>,
}

impl AppState {
    /// Create application state from the environment.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let pipeline = PipelineHandle::new(PipelineConfig::from_env()?)?;
        info!(
            backend = %pipeline.config().backend,
            model_id = %pipeline.config().model_id,
            "Pipeline configured (loads on first request)"
        );

        let (queue, results) = if std::env::var("REDIS_URL").is_ok() {
            let queue_config = QueueConfig::from_env();
            let results = JobResultStore::new(&queue_config.redis_url)?;
            let queue = JobQueue::new(queue_config)?;
            if let Err(e) = queue.init().await {
                warn!("Queue not initialized yet: {}", e);
            }
            (Some(Arc::new(queue)), Some(Arc::new(results)))
        } else {
            info!("REDIS_URL not set, job routes disabled");
            (None, None)
        };

        let storage = match StorageClient::from_env() {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                info!("Storage not configured: {}", e);
                None
            }
        };

        Ok(Self {
            config,
            pipeline: Arc::new(pipeline),
            queue,
            results,
            storage,
        })
    }

    /// State with only a pipeline handle.
    pub fn with_pipeline(config: ApiConfig, pipeline: Arc<PipelineHandle>) -> Self {
        Self {
            config,
            pipeline,
            queue: None,
            results: None,
            storage: None,
        }
    }
}
