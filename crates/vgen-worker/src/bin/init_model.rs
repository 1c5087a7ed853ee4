//! Container start-up step: load the model once and optionally run a short
//! test generation, so the first real job does not pay the load cost.

use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vgen_pipeline::{check_ffmpeg, warm_up, PipelineConfig, PipelineHandle};
use vgen_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let worker_config = WorkerConfig::from_env();
    ensure_workdir(&worker_config.work_dir).await?;

    let ffmpeg = check_ffmpeg().context("ffmpeg is required to export videos")?;
    info!("Using ffmpeg at {}", ffmpeg.display());

    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;
    info!(backend = %config.backend, model_id = %config.model_id, "Initializing model");
    let handle = PipelineHandle::new(config)?;

    let test_generation = std::env::var("TEST_GENERATION")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let report = warm_up(&handle, test_generation)
        .await
        .context("model initialization failed")?;

    info!(
        load_time_secs = report.load_time.as_secs_f64(),
        gpu_available = report.memory_stats.gpu_available,
        allocated_gb = report.memory_stats.allocated_gb,
        reserved_gb = report.memory_stats.reserved_gb,
        "Model initialized"
    );
    match report.test_generation {
        Some(true) => info!("Test generation succeeded"),
        Some(false) => warn!("Test generation failed"),
        None if test_generation => info!("Test generation skipped: no GPU reported"),
        None => {}
    }

    Ok(())
}

async fn ensure_workdir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("cannot create work dir {}", path.display()))
}
