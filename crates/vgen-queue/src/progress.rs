//! Progress events via Redis Pub/Sub.

use std::pin::Pin;

use futures_util::Stream;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vgen_models::{JobId, ProgressMessage};

use crate::error::QueueResult;

/// Progress event published to Redis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub message: ProgressMessage,
}

/// Channel for publishing/subscribing to progress events.
pub struct ProgressChannel {
    client: redis::Client,
}

impl ProgressChannel {
    /// Create a new progress channel.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Get the channel name for a job.
    pub fn channel_name(job_id: &JobId) -> String {
        format!("progress:{}", job_id)
    }

    /// Publish a progress event.
    pub async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&event.job_id);
        let payload = serde_json::to_string(event)?;

        debug!("Publishing {} event to {}", event.message.message_type().as_str(), channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }

    async fn send(&self, job_id: &JobId, message: ProgressMessage) -> QueueResult<()> {
        self.publish(&ProgressEvent {
            job_id: job_id.clone(),
            message,
        })
        .await
    }

    /// Publish a log message.
    pub async fn log(&self, job_id: &JobId, message: impl Into<String>) -> QueueResult<()> {
        self.send(job_id, ProgressMessage::log(message)).await
    }

    /// Publish a progress update.
    pub async fn progress(&self, job_id: &JobId, value: u8) -> QueueResult<()> {
        self.send(job_id, ProgressMessage::progress(value)).await
    }

    /// Publish done message with the signed video URL.
    pub async fn done(&self, job_id: &JobId, video_url: &str) -> QueueResult<()> {
        self.send(job_id, ProgressMessage::done(video_url)).await
    }

    /// Publish error message.
    pub async fn error(&self, job_id: &JobId, message: impl Into<String>) -> QueueResult<()> {
        self.send(job_id, ProgressMessage::error(message)).await
    }

    /// Subscribe to progress events for a job.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        job_id: &JobId,
    ) -> QueueResult<Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(Self::channel_name(job_id)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}
