//! Startup recovery of interrupted jobs.
//!
//! Runs once at process start. Recent PENDING jobs (and optionally jobs stuck
//! in PROCESSING) are resubmitted, at most one per listing, and never while
//! another job for the same listing is processing.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use reel_firestore::JobStore;
use reel_models::{Job, JobId, JobStatus, JobUpdate};
use reel_queue::{JobQueue, QueueError};

use crate::config::RecoveryConfig;
use crate::error::PipelineResult;
use crate::pipeline::{ExecuteOptions, Orchestrator};

/// Where recovered jobs are sent.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit(&self, job: &Job) -> PipelineResult<()>;
}

/// Runs the job inline.
#[async_trait]
impl JobSubmitter for Orchestrator {
    async fn submit(&self, job: &Job) -> PipelineResult<()> {
        self.execute(job.clone(), ExecuteOptions::default()).await?;
        Ok(())
    }
}

/// Enqueues an execute task.
pub struct QueueSubmitter {
    queue: Arc<JobQueue>,
}

impl QueueSubmitter {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl JobSubmitter for QueueSubmitter {
    async fn submit(&self, job: &Job) -> PipelineResult<()> {
        match self.queue.enqueue_execute(job.id.clone(), Vec::new()).await {
            Ok(_) | Err(QueueError::Duplicate(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub resubmitted: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct RecoveryScanner {
    jobs: Arc<dyn JobStore>,
    submitter: Arc<dyn JobSubmitter>,
    config: RecoveryConfig,
}

impl RecoveryScanner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        submitter: Arc<dyn JobSubmitter>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            jobs,
            submitter,
            config,
        }
    }

    /// Scan and resubmit. Individual failures are counted, not returned.
    pub async fn run(&self) -> PipelineResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        if !self.config.enabled {
            info!("Startup recovery disabled");
            return Ok(report);
        }

        let since = Utc::now() - self.config.window;
        let mut candidates = self
            .jobs
            .list_by_status_since(JobStatus::Pending, since, self.config.limit)
            .await?;
        // Stuck jobs being recovered in this scan never make their listing busy.
        let mut recovering: HashSet<JobId> = HashSet::new();
        if self.config.include_processing {
            let stuck = self
                .jobs
                .list_by_status_since(JobStatus::Processing, since, self.config.limit)
                .await?;
            recovering.extend(stuck.iter().map(|job| job.id.clone()));
            candidates.extend(stuck);
        }
        candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        info!(candidates = candidates.len(), "Starting recovery scan");

        let mut claimed_listings: HashSet<String> = HashSet::new();
        for job in candidates {
            if claimed_listings.contains(&job.listing_id) {
                info!(job_id = %job.id, listing_id = %job.listing_id, "Skipping: listing already resubmitted");
                report.skipped += 1;
                continue;
            }

            match self.listing_busy(&job, &recovering).await {
                Ok(true) => {
                    info!(job_id = %job.id, listing_id = %job.listing_id, "Skipping: another job for the listing is processing");
                    report.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(job_id = %job.id, "Could not check listing activity: {}", e);
                    report.failed += 1;
                    continue;
                }
            }

            claimed_listings.insert(job.listing_id.clone());
            match self.resubmit(&job).await {
                Ok(()) => {
                    info!(job_id = %job.id, status = %job.status, "Resubmitted job");
                    report.resubmitted += 1;
                }
                Err(e) => {
                    warn!(job_id = %job.id, "Failed to resubmit job: {}", e);
                    report.failed += 1;
                }
            }
        }

        metrics::counter!("pipeline_recovery_resubmitted_total").increment(report.resubmitted as u64);
        info!(
            resubmitted = report.resubmitted,
            skipped = report.skipped,
            failed = report.failed,
            "Recovery scan finished"
        );
        Ok(report)
    }

    /// Another job on the same listing is PROCESSING and is not itself
    /// being recovered.
    async fn listing_busy(&self, job: &Job, recovering: &HashSet<JobId>) -> PipelineResult<bool> {
        let processing = self.jobs.list_processing_by_listing(&job.listing_id).await?;
        Ok(processing
            .iter()
            .any(|other| other.id != job.id && !recovering.contains(&other.id)))
    }

    async fn resubmit(&self, job: &Job) -> PipelineResult<()> {
        let mut job = job.clone();
        if job.status == JobStatus::Processing {
            let reset = JobUpdate::new().status(JobStatus::Pending).progress(0);
            self.jobs.update(&job.id, reset.clone()).await?;
            job.apply(&reset);
        }
        self.submitter.submit(&job).await
    }
}
