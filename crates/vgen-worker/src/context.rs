//! Shared state for job processing.

use std::sync::Arc;

use tracing::{error, info};
use vgen_pipeline::{PipelineConfig, PipelineHandle};
use vgen_queue::{JobResultStore, ProgressChannel};
use vgen_storage::StorageClient;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;

/// Everything a job needs: the model handle, storage and Redis side channels.
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub pipeline: Arc<PipelineHandle>,
    /// `None` when storage credentials are missing; generate jobs then fail
    pub storage: Option<StorageClient>,
    pub progress: Option<ProgressChannel>,
    pub results: Option<JobResultStore>,
}

impl WorkerContext {
    /// Build the context from the environment.
    ///
    /// A storage configuration error is logged and leaves storage unset,
    /// so the worker still starts and reports the problem per job.
    pub fn from_env(config: WorkerConfig, redis_url: &str) -> WorkerResult<Self> {
        let pipeline = PipelineHandle::new(PipelineConfig::from_env()?)?;
        info!(
            backend = %pipeline.config().backend,
            model_id = %pipeline.config().model_id,
            "Pipeline configured (loads on first job)"
        );

        let storage = match StorageClient::from_env() {
            Ok(client) => {
                info!(bucket = client.bucket(), "Storage client created");
                Some(client)
            }
            Err(e) => {
                error!("Error creating storage client: {}", e);
                None
            }
        };

        Ok(Self {
            config,
            pipeline: Arc::new(pipeline),
            storage,
            progress: Some(ProgressChannel::new(redis_url)?),
            results: Some(JobResultStore::new(redis_url)?),
        })
    }

    /// Context without Redis side channels.
    pub fn new(config: WorkerConfig, pipeline: Arc<PipelineHandle>, storage: Option<StorageClient>) -> Self {
        Self {
            config,
            pipeline,
            storage,
            progress: None,
            results: None,
        }
    }
}
