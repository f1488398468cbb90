//! Task queue using Redis Streams.

use std::time::Duration;

use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use reel_models::JobId;

use crate::error::{QueueError, QueueResult};
use crate::task::{ExecuteJob, PipelineTask, RegenerateJob};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    pub stream_name: String,
    pub consumer_group: String,
    /// How long an idempotency key blocks a duplicate enqueue
    pub dedup_ttl: Duration,
    /// Pending entries idle longer than this are reclaimed by another worker
    pub claim_min_idle: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "reel:tasks".to_string(),
            consumer_group: "reel:workers".to_string(),
            dedup_ttl: Duration::from_secs(3600),
            claim_min_idle: Duration::from_secs(900),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str, default: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dedup_ttl: secs("QUEUE_DEDUP_TTL_SECS", defaults.dedup_ttl),
            claim_min_idle: secs("QUEUE_CLAIM_MIN_IDLE_SECS", defaults.claim_min_idle),
        }
    }

    fn dedup_key(&self, idempotency_key: &str) -> String {
        format!("{}:dedup:{}", self.stream_name, idempotency_key)
    }
}

/// Pipeline task queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Create the consumer group if it does not exist yet.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

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

    pub async fn enqueue_execute(&self, job_id: JobId, templates: Vec<String>) -> QueueResult<String> {
        self.enqueue(PipelineTask::Execute(
            ExecuteJob::new(job_id).with_templates(templates),
        ))
        .await
    }

    pub async fn enqueue_regenerate(
        &self,
        job_id: JobId,
        photo_indices: Vec<usize>,
        templates: Option<Vec<String>>,
    ) -> QueueResult<String> {
        self.enqueue(PipelineTask::Regenerate(RegenerateJob::new(
            job_id,
            photo_indices,
            templates,
        )))
        .await
    }

    /// Add a task to the stream. Returns the stream message id.
    pub async fn enqueue(&self, task: PipelineTask) -> QueueResult<String> {
        let mut conn = self.connection().await?;

        let payload = serde_json::to_string(&task)?;
        let idempotency_key = task.idempotency_key();

        // SET NX claims the key atomically; a nil reply means a duplicate.
        let claimed: Option<String> = redis::cmd("SET")
            .arg(self.config.dedup_key(&idempotency_key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        if claimed.is_none() {
            warn!(key = %idempotency_key, "Duplicate task rejected");
            return Err(QueueError::Duplicate(idempotency_key));
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("task")
            .arg(&payload)
            .arg("key")
            .arg(&idempotency_key)
            .query_async(&mut conn)
            .await?;

        info!(
            job_id = %task.job_id(),
            kind = task.kind(),
            message_id = %message_id,
            "Enqueued pipeline task"
        );

        Ok(message_id)
    }

    /// Acknowledge and remove a processed entry.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!(message_id, "Acknowledged task");
        Ok(())
    }

    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        Ok(conn.xlen(&self.config.stream_name).await?)
    }

    /// Read new entries for this consumer, blocking up to `block_ms`.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, PipelineTask)>> {
        let mut conn = self.connection().await?;

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
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        Ok(self.decode_entries(entries).await)
    }

    /// Take over entries another consumer left pending for longer than
    /// `claim_min_idle`.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        count: usize,
    ) -> QueueResult<Vec<(String, PipelineTask)>> {
        let mut conn = self.connection().await?;
        let min_idle_ms = self.config.claim_min_idle.as_millis() as u64;

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

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            cmd.arg(&entry.id);
        }
        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;

        let tasks = self.decode_entries(claimed.ids).await;
        for (message_id, task) in &tasks {
            info!(job_id = %task.job_id(), message_id = %message_id, "Claimed pending task");
        }
        Ok(tasks)
    }

    /// Decode stream entries. Malformed payloads are acked so they are not redelivered.
    async fn decode_entries(&self, entries: Vec<StreamId>) -> Vec<(String, PipelineTask)> {
        let mut tasks = Vec::with_capacity(entries.len());

        for entry in entries {
            let decoded = match entry.map.get("task") {
                Some(redis::Value::BulkString(payload)) => {
                    serde_json::from_slice::<PipelineTask>(payload).map_err(|e| e.to_string())
                }
                _ => Err("missing task field".to_string()),
            };

            match decoded {
                Ok(task) => {
                    debug!(job_id = %task.job_id(), "Consumed task from stream");
                    tasks.push((entry.id, task));
                }
                Err(e) => {
                    warn!(message_id = %entry.id, "Dropping malformed task: {}", e);
                    if let Err(e) = self.ack(&entry.id).await {
                        warn!(message_id = %entry.id, "Failed to ack malformed task: {}", e);
                    }
                }
            }
        }

        tasks
    }
}
