//! Job handlers.

use std::path::Path;
use std::time::Instant;

use tracing::Instrument;
use vgen_models::{output_file_name, GenerationRequest, JobId, JobOutput, MemoryStats};
use vgen_pipeline::{warm_up, GenerationOutput, WarmUpReport};
use vgen_queue::{GenerateVideoJob, WarmUpJob};
use vgen_storage::StorageClient;

use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::retry::{retry_async, RetryConfig};

/// Generate a video for `job`, upload it and return a signed URL.
pub async fn handle_job(ctx: &WorkerContext, job: &GenerateVideoJob) -> WorkerResult<JobOutput> {
    let logger = JobLogger::new(&job.job_id, "generate_video");
    run_generate(ctx, job, &logger)
        .instrument(logger.span())
        .await
}

async fn run_generate(
    ctx: &WorkerContext,
    job: &GenerateVideoJob,
    logger: &JobLogger,
) -> WorkerResult<JobOutput> {
    let started = Instant::now();

    let request = job.input.parse().map_err(|e| {
        logger.log_error(&format!("Error parsing input: {}", e));
        WorkerError::InvalidInput(e)
    })?;

    let storage = ctx.storage.as_ref().ok_or(WorkerError::StorageUnavailable)?;

    let file_name = output_file_name();
    let video_path = ctx.config.work_dir.join(&file_name);
    logger.log_start(&format!(
        "{}x{} for {}s into {}",
        request.width,
        request.height,
        request.seconds,
        video_path.display()
    ));
    publish(ctx, &job.job_id, 5, "Generating video").await;

    let result = generate_and_upload(ctx, storage, &request, &video_path, &file_name, logger).await;
    if ctx.pipeline.config().cleanup_outputs {
        remove_output(&video_path, logger).await;
    }
    let (generated, video_url) = result?;

    let memory_stats = ctx.pipeline.memory_stats().await.unwrap_or_else(|e| {
        logger.log_warning(&format!("Memory stats unavailable: {}", e));
        MemoryStats::unavailable()
    });

    let output = JobOutput {
        video_url,
        processing_time: started.elapsed().as_secs_f64(),
        generation_time: generated.generation_time.as_secs_f64(),
        memory_stats,
    };
    logger.log_completion(&format!(
        "{} frames, generation {:.1}s, total {:.1}s",
        generated.num_frames, output.generation_time, output.processing_time
    ));

    Ok(output)
}

async fn generate_and_upload(
    ctx: &WorkerContext,
    storage: &StorageClient,
    request: &GenerationRequest,
    video_path: &Path,
    file_name: &str,
    logger: &JobLogger,
) -> WorkerResult<(GenerationOutput, String)> {
    let generated = ctx
        .pipeline
        .generate_video(request, video_path)
        .await
        .map_err(|e| {
            logger.log_error(&format!("Error generating video: {}", e));
            WorkerError::GenerationFailed(e)
        })?;
    publish(ctx, logger.job_id(), 80, "Uploading video").await;

    let retry = RetryConfig::new("video_upload").with_max_retries(ctx.config.upload_retries);
    let key = retry_async(&retry, || storage.upload_video(video_path, file_name))
        .await
        .map_err(|e| {
            logger.log_error(&format!("Error uploading video: {}", e));
            WorkerError::UploadFailed(e)
        })?;
    logger.log_progress(&format!("Uploaded to {}", key));

    let video_url = storage.signed_video_url(&key).await?;
    Ok((generated, video_url))
}

/// Remove an exported video. A file that was never written is not an error.
async fn remove_output(path: &Path, logger: &JobLogger) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => logger.log_warning(&format!("Failed to remove {}: {}", path.display(), e)),
    }
}

/// Load the model and optionally run a test generation.
pub async fn handle_warm_up(ctx: &WorkerContext, job: &WarmUpJob) -> WorkerResult<WarmUpReport> {
    let logger = JobLogger::new(&job.job_id, "warm_up");
    logger.log_start(&format!("test_generation={}", job.test_generation));

    let report = warm_up(&ctx.pipeline, job.test_generation)
        .instrument(logger.span())
        .await?;

    if report.test_generation == Some(false) {
        logger.log_warning("Test generation failed");
    }
    logger.log_completion(&format!("model ready in {:.1}s", report.load_time.as_secs_f64()));
    Ok(report)
}

async fn publish(ctx: &WorkerContext, job_id: &JobId, value: u8, message: &str) {
    if let Some(progress) = &ctx.progress {
        progress.log(job_id, message).await.ok();
        progress.progress(job_id, value).await.ok();
    }
}
