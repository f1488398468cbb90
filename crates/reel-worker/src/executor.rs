//! Queue executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reel_queue::{JobQueue, PipelineTask};

use crate::config::WorkerConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Orchestrator;
use crate::retry::FailureTracker;

/// Consumes pipeline tasks and runs them on the orchestrator.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    orchestrator: Arc<Orchestrator>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: Arc<JobQueue>, orchestrator: Arc<Orchestrator>) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            orchestrator,
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Run until [`shutdown`](Self::shutdown) is called, then drain in-flight jobs.
    pub async fn run(&self) -> PipelineResult<()> {
        info!(
            consumer = %self.consumer_name,
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Starting job executor"
        );

        self.queue.init().await?;

        let claim_task = self.spawn_claim_loop();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new(3);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_tasks() => {
                    match result {
                        Ok(()) => failures.record_success(),
                        Err(e) => {
                            if failures.record_failure() {
                                error!("Error consuming tasks: {}", e);
                            }
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Shutdown timeout reached with jobs still running"
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Periodically take over tasks abandoned by crashed consumers.
    fn spawn_claim_loop(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let orchestrator = Arc::clone(&self.orchestrator);
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer_name = self.consumer_name.clone();
        let claim_interval = self.config.claim_interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            let mut failures = FailureTracker::new(3);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let available = semaphore.available_permits();
                        if available == 0 {
                            continue;
                        }
                        match queue.claim_pending(&consumer_name, available).await {
                            Ok(tasks) => {
                                failures.record_success();
                                if !tasks.is_empty() {
                                    info!("Claimed {} pending tasks", tasks.len());
                                }
                                for (message_id, task) in tasks {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    let queue = Arc::clone(&queue);
                                    let orchestrator = Arc::clone(&orchestrator);
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_task(orchestrator, queue, message_id, task).await;
                                    });
                                }
                            }
                            Err(e) => {
                                if failures.record_failure() {
                                    warn!("Failed to claim pending tasks: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    async fn consume_tasks(&self) -> PipelineResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let tasks = self
            .queue
            .consume(
                &self.consumer_name,
                self.config.consume_block.as_millis() as u64,
                available,
            )
            .await?;

        if tasks.is_empty() {
            return Ok(());
        }
        debug!("Consumed {} tasks from queue", tasks.len());

        for (message_id, task) in tasks {
            let orchestrator = Arc::clone(&self.orchestrator);
            let queue = Arc::clone(&self.queue);
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::config_error("job semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_task(orchestrator, queue, message_id, task).await;
            });
        }

        Ok(())
    }

    /// Run one task and settle it on the queue.
    ///
    /// Acked on success and on permanent errors. A retryable error leaves the
    /// entry pending so the claim loop redelivers it.
    async fn execute_task(
        orchestrator: Arc<Orchestrator>,
        queue: Arc<JobQueue>,
        message_id: String,
        task: PipelineTask,
    ) {
        let job_id = task.job_id().clone();
        info!(job_id = %job_id, kind = task.kind(), "Executing task");

        let ack = match orchestrator.handle(&task).await {
            Ok(()) => true,
            Err(e) if e.is_retryable() => {
                warn!(job_id = %job_id, "Task will be redelivered: {}", e);
                false
            }
            Err(e) => {
                error!(job_id = %job_id, "Dropping task: {}", e);
                true
            }
        };

        metrics::counter!("pipeline_tasks_total", "kind" => task.kind(), "acked" => ack.to_string())
            .increment(1);

        if ack {
            if let Err(e) = queue.ack(&message_id).await {
                error!(job_id = %job_id, message_id = %message_id, "Failed to ack task: {}", e);
            }
        }
    }

    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.config.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
