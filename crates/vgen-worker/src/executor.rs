//! Job executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vgen_models::{JobOutput, JobState};
use vgen_queue::{JobQueue, QueueJob};

use crate::config::WorkerConfig;
use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::{handle_job, handle_warm_up};
use crate::retry::FailureTracker;

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    ctx: Arc<WorkerContext>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(queue: JobQueue, ctx: WorkerContext) -> Self {
        let config = ctx.config.clone();
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue: Arc::new(queue),
            ctx: Arc::new(ctx),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Start the executor. Returns after [`JobExecutor::shutdown`] once
    /// in-flight jobs finish or the shutdown timeout passes.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;
        tokio::fs::create_dir_all(&self.config.work_dir).await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_task();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs still running after {:?}; they will be reclaimed by another worker",
                self.config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Periodically claim jobs abandoned by crashed workers.
    fn spawn_claim_task(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let ctx = Arc::clone(&self.ctx);
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer_name = self.consumer_name.clone();
        let interval = self.config.claim_interval;
        let min_idle_ms = self.config.claim_min_idle.as_millis() as u64;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let available = semaphore.available_permits();
                        if available == 0 {
                            continue;
                        }
                        match queue.claim_pending(&consumer_name, min_idle_ms, available).await {
                            Ok(jobs) if !jobs.is_empty() => {
                                info!("Claimed {} pending jobs", jobs.len());
                                for (message_id, job) in jobs {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    let ctx = Arc::clone(&ctx);
                                    let queue = Arc::clone(&queue);
                                    let consumer_name = consumer_name.clone();

                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_job(ctx, queue, consumer_name, message_id, job).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to claim pending jobs: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Consume and process jobs from the queue.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let ctx = Arc::clone(&self.ctx);
            let queue = Arc::clone(&self.queue);
            let consumer_name = self.consumer_name.clone();
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(ctx, queue, consumer_name, message_id, job).await;
            });
        }

        Ok(())
    }

    /// Execute a single job with retry and DLQ handling.
    async fn execute_job(
        ctx: Arc<WorkerContext>,
        queue: Arc<JobQueue>,
        consumer_name: String,
        message_id: String,
        job: QueueJob,
    ) {
        let job_id = job.job_id().clone();
        let kind = job.kind();
        info!(job_type = kind, "Executing job {}", job_id);

        if let Some(results) = &ctx.results {
            if let Err(e) = results.set_status(&job_id, JobState::Processing).await {
                warn!("Failed to record status for job {}: {}", job_id, e);
            }
        }

        let heartbeat = Self::spawn_heartbeat(
            Arc::clone(&queue),
            consumer_name,
            message_id.clone(),
            ctx.config.job_heartbeat_interval,
        );

        let started = Instant::now();
        let result = match tokio::time::timeout(ctx.config.job_timeout, Self::process_job(&ctx, &job)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout(ctx.config.job_timeout.as_secs())),
        };
        heartbeat.abort();

        metrics::histogram!("vgen_job_duration_seconds", "job_type" => kind)
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(output) => {
                info!("Job {} completed successfully", job_id);
                metrics::counter!("vgen_jobs_completed_total", "job_type" => kind).increment(1);

                if let Err(e) = queue.ack(&message_id).await {
                    error!("Failed to ack job {}: {}", job_id, e);
                }
                if let Err(e) = queue.clear_dedup(&job).await {
                    warn!("Failed to clear dedup key for job {}: {}", job_id, e);
                }

                if let Some(results) = &ctx.results {
                    let stored = match &output {
                        Some(output) => results.store_output(&job_id, output).await,
                        None => results.set_status(&job_id, JobState::Completed).await,
                    };
                    if let Err(e) = stored {
                        warn!("Failed to store result for job {}: {}", job_id, e);
                    }
                }
                if let (Some(progress), Some(output)) = (&ctx.progress, &output) {
                    progress.done(&job_id, &output.video_url).await.ok();
                }
            }
            Err(e) => {
                let detail = e.detail();
                error!("Job {} failed: {}", job_id, detail);
                metrics::counter!("vgen_jobs_failed_total", "job_type" => kind).increment(1);

                let retry_count = if e.is_permanent_failure() {
                    u32::MAX
                } else {
                    queue.increment_retry(&message_id).await.unwrap_or(u32::MAX)
                };
                let max_retries = queue.max_retries();

                if retry_count >= max_retries || !e.is_retryable() {
                    warn!("Job {} will not be retried, moving to DLQ", job_id);
                    if let Err(dlq_err) = queue.dlq(&message_id, &job, &detail).await {
                        error!("Failed to move job {} to DLQ: {}", job_id, dlq_err);
                    }
                    if let Err(e) = queue.clear_dedup(&job).await {
                        warn!("Failed to clear dedup key for job {}: {}", job_id, e);
                    }
                    metrics::counter!("vgen_jobs_dead_lettered_total", "job_type" => kind).increment(1);

                    if let Some(results) = &ctx.results {
                        results
                            .store_error(&job_id, JobState::DeadLettered, &e.to_string())
                            .await
                            .ok();
                    }
                    if let Some(progress) = &ctx.progress {
                        progress.error(&job_id, e.to_string()).await.ok();
                    }
                } else {
                    info!("Job {} will be retried (attempt {}/{})", job_id, retry_count, max_retries);
                    if let Some(results) = &ctx.results {
                        results.store_error(&job_id, JobState::Failed, &e.to_string()).await.ok();
                    }
                    // Left pending; the claim task redelivers it after claim_min_idle
                }
            }
        }
    }

    /// Keep claiming the message while the job runs so other workers leave it alone.
    fn spawn_heartbeat(
        queue: Arc<JobQueue>,
        consumer_name: String,
        message_id: String,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tracker = FailureTracker::new(3);
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match queue.touch(&consumer_name, &message_id).await {
                    Ok(()) => tracker.record_success(),
                    Err(e) => {
                        if tracker.record_failure() {
                            warn!("Heartbeat for message {} failed: {}", message_id, e);
                        }
                    }
                }
            }
        })
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.config.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Process a single job. Warm-up jobs have no output.
    async fn process_job(ctx: &WorkerContext, job: &QueueJob) -> WorkerResult<Option<JobOutput>> {
        match job {
            QueueJob::GenerateVideo(j) => handle_job(ctx, j).await.map(Some),
            QueueJob::WarmUp(j) => handle_warm_up(ctx, j).await.map(|_| None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vgen_pipeline::{PipelineConfig, PipelineHandle};
    use vgen_queue::{GenerateVideoJob, JobInput, WarmUpJob};

    fn preview_context() -> WorkerContext {
        let pipeline = Arc::new(PipelineHandle::new(PipelineConfig::preview()).unwrap());
        WorkerContext::new(WorkerConfig::default(), pipeline, None)
    }

    #[tokio::test]
    async fn test_warm_up_job_has_no_output() {
        let ctx = preview_context();
        let output = JobExecutor::process_job(&ctx, &QueueJob::WarmUp(WarmUpJob::new(false)))
            .await
            .unwrap();
        assert!(output.is_none());
    }

    #[tokio::test]
    async fn test_generate_job_errors_are_dispatched() {
        let ctx = preview_context();
        let job = GenerateVideoJob::new(JobInput::new(serde_json::json!({})));
        let err = JobExecutor::process_job(&ctx, &QueueJob::GenerateVideo(job))
            .await
            .unwrap_err();
        assert!(err.is_permanent_failure());
    }
}
