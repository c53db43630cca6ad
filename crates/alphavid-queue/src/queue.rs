//! Job queue using Redis Streams.

use std::time::Duration;

use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::ConvertJob;

/// Dedup markers live this long after enqueue.
const DEDUP_TTL_SECS: u64 = 3600;

/// Retry counters live this long.
const RETRY_TTL_SECS: i64 = 86400;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Max retries before DLQ
    pub max_retries: u32,
    /// Pending jobs idle this long belong to a crashed worker
    pub claim_min_idle: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379/0".to_string(),
            stream_name: "alphavid:jobs".to_string(),
            consumer_group: "alphavid:workers".to_string(),
            dlq_stream_name: "alphavid:dlq".to_string(),
            max_retries: 3,
            // Whole-job limit plus a minute of slack
            claim_min_idle: Duration::from_secs(660),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            claim_min_idle: std::env::var("QUEUE_CLAIM_MIN_IDLE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
        }
    }
}

/// Job queue client.
#[derive(Clone)]
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn dedup_key(&self, idempotency_key: &str) -> String {
        format!("{}:dedup:{}", self.config.stream_name, idempotency_key)
    }

    fn retry_key(&self, message_id: &str) -> String {
        format!("{}:retry:{}", self.config.stream_name, message_id)
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // Create consumer group (ignore error if already exists)
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a job. Returns the stream message ID.
    pub async fn enqueue(&self, job: &ConvertJob) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(job)?;
        let idempotency_key = job.idempotency_key();

        // Claim the dedup marker atomically
        let dedup_key = self.dedup_key(&idempotency_key);
        let fresh: Option<String> = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(DEDUP_TTL_SECS)
            .query_async(&mut conn)
            .await?;
        if fresh.is_none() {
            warn!("Duplicate job rejected: {}", idempotency_key);
            return Err(QueueError::Duplicate(idempotency_key));
        }

        let added: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(&idempotency_key)
            .query_async(&mut conn)
            .await;

        let message_id = match added {
            Ok(id) => id,
            Err(e) => {
                let _: Result<(), _> = conn.del(&dedup_key).await;
                return Err(QueueError::enqueue_failed(e.to_string()));
            }
        };

        info!(
            task_id = %job.task_id,
            "Enqueued job with message ID {}",
            message_id
        );

        Ok(message_id)
    }

    /// Acknowledge a job (mark as completed).
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        // Delete the message from the stream
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        conn.del::<_, ()>(self.retry_key(message_id)).await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Drop the dedup marker so the same task may be enqueued again.
    pub async fn clear_dedup(&self, job: &ConvertJob) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(self.dedup_key(&job.idempotency_key())).await?;
        Ok(())
    }

    /// Move a job to the dead letter queue.
    pub async fn dlq(&self, message_id: &str, job: &ConvertJob, error: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        // Ack the original message
        self.ack(message_id).await?;

        warn!(task_id = %job.task_id, "Moved job to DLQ: {}", error);
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Read up to `count` new jobs for `consumer_name`, blocking up to `block_ms`.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, ConvertJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let entries = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        Ok(self.decode_entries(entries, "Consumed").await)
    }

    /// Claim pending jobs that have been idle for too long.
    /// This handles jobs from crashed workers.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        count: usize,
    ) -> QueueResult<Vec<(String, ConvertJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let min_idle_ms = self.config.claim_min_idle.as_millis() as u64;

        // Only entries already idle past the claim window
        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        // Re-checks idleness, so a concurrent claimer wins at most once
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            cmd.arg(&entry.id);
        }
        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;

        Ok(self.decode_entries(claimed.ids, "Claimed pending").await)
    }

    async fn decode_entries(&self, entries: Vec<StreamId>, verb: &str) -> Vec<(String, ConvertJob)> {
        let mut jobs = Vec::new();

        for entry in entries {
            let message_id = entry.id.clone();
            let Some(payload) = entry.get::<String>("job") else {
                warn!("Stream entry {} has no job payload", message_id);
                self.ack(&message_id).await.ok();
                continue;
            };

            match serde_json::from_str::<ConvertJob>(&payload) {
                Ok(job) => {
                    debug!(task_id = %job.task_id, "{} job from stream", verb);
                    jobs.push((message_id, job));
                }
                Err(e) => {
                    warn!("Failed to parse job payload: {}", e);
                    // Ack the malformed message to prevent reprocessing
                    self.ack(&message_id).await.ok();
                }
            }
        }

        jobs
    }

    /// Get retry count for a job.
    pub async fn get_retry_count(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let count: Option<u32> = conn.get(self.retry_key(message_id)).await?;
        Ok(count.unwrap_or(0))
    }

    /// Increment retry count for a job.
    pub async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let key = self.retry_key(message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, RETRY_TTL_SECS).await?;
        Ok(count)
    }

    /// Get max retries from config.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}
