//! Startup recovery scan tests.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use common::{five_photos, Harness, MemoryJobStore};
use reel_models::{Job, JobId, JobStatus, NewJob};
use reel_worker::{
    JobSubmitter, PipelineError, PipelineResult, RecoveryConfig, RecoveryReport, RecoveryScanner,
};

#[derive(Default)]
struct RecordingSubmitter {
    submitted: Mutex<Vec<Job>>,
    fail_for: Option<JobId>,
}

impl RecordingSubmitter {
    fn ids(&self) -> Vec<String> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|j| j.id.to_string())
            .collect()
    }
}

#[async_trait]
impl JobSubmitter for RecordingSubmitter {
    async fn submit(&self, job: &Job) -> PipelineResult<()> {
        if self.fail_for.as_ref() == Some(&job.id) {
            return Err(PipelineError::config_error("queue unavailable"));
        }
        self.submitted.lock().unwrap().push(job.clone());
        Ok(())
    }
}

fn job(id: &str, listing: &str, status: JobStatus, age_minutes: i64) -> Job {
    let mut job = Job::from_new(NewJob::new(
        listing,
        "user-1",
        "wave",
        vec!["photos/0.jpg".to_string()],
    ));
    job.id = JobId::from(id);
    job.status = status;
    job.created_at = Utc::now() - Duration::minutes(age_minutes);
    job
}

fn scanner(
    jobs: &Arc<MemoryJobStore>,
    submitter: &Arc<RecordingSubmitter>,
    config: RecoveryConfig,
) -> RecoveryScanner {
    RecoveryScanner::new(jobs.clone(), submitter.clone(), config)
}

#[tokio::test]
async fn test_resubmits_recent_pending_jobs() {
    let jobs = Arc::new(MemoryJobStore::default());
    jobs.insert(job("a", "listing-a", JobStatus::Pending, 10));
    jobs.insert(job("b", "listing-b", JobStatus::Pending, 5));
    jobs.insert(job("old", "listing-c", JobStatus::Pending, 60 * 48));
    jobs.insert(job("done", "listing-d", JobStatus::Completed, 1));

    let submitter = Arc::new(RecordingSubmitter::default());
    let report = scanner(&jobs, &submitter, RecoveryConfig::default())
        .run()
        .await
        .unwrap();

    assert_eq!(
        report,
        RecoveryReport {
            resubmitted: 2,
            skipped: 0,
            failed: 0
        }
    );
    // Newest first.
    assert_eq!(submitter.ids(), vec!["b", "a"]);
}

#[tokio::test]
async fn test_one_job_per_listing() {
    let jobs = Arc::new(MemoryJobStore::default());
    jobs.insert(job("older", "listing-1", JobStatus::Pending, 20));
    jobs.insert(job("newer", "listing-1", JobStatus::Pending, 2));

    let submitter = Arc::new(RecordingSubmitter::default());
    let report = scanner(&jobs, &submitter, RecoveryConfig::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.resubmitted, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(submitter.ids(), vec!["newer"]);
}

#[tokio::test]
async fn test_skips_listing_with_processing_job() {
    let jobs = Arc::new(MemoryJobStore::default());
    jobs.insert(job("busy", "listing-1", JobStatus::Processing, 3));
    jobs.insert(job("waiting", "listing-1", JobStatus::Pending, 1));
    jobs.insert(job("free", "listing-2", JobStatus::Pending, 1));

    let submitter = Arc::new(RecordingSubmitter::default());
    let report = scanner(&jobs, &submitter, RecoveryConfig::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.resubmitted, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(submitter.ids(), vec!["free"]);
}

#[tokio::test]
async fn test_processing_jobs_reset_when_included() {
    let jobs = Arc::new(MemoryJobStore::default());
    let mut stuck = job("stuck", "listing-1", JobStatus::Processing, 30);
    stuck.progress = 40;
    jobs.insert(stuck);

    let submitter = Arc::new(RecordingSubmitter::default());
    let config = RecoveryConfig {
        include_processing: true,
        ..RecoveryConfig::default()
    };
    let report = scanner(&jobs, &submitter, config).run().await.unwrap();

    assert_eq!(report.resubmitted, 1);
    let stored = jobs.job(&"stuck".into());
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.progress, 0);

    let submitted = submitter.submitted.lock().unwrap();
    assert_eq!(submitted[0].status, JobStatus::Pending);
}

#[tokio::test]
async fn test_stuck_jobs_on_one_listing_recover_newest() {
    let jobs = Arc::new(MemoryJobStore::default());
    jobs.insert(job("stuck-old", "listing-1", JobStatus::Processing, 40));
    jobs.insert(job("stuck-new", "listing-1", JobStatus::Processing, 10));

    let submitter = Arc::new(RecordingSubmitter::default());
    let config = RecoveryConfig {
        include_processing: true,
        ..RecoveryConfig::default()
    };
    let report = scanner(&jobs, &submitter, config).run().await.unwrap();

    assert_eq!(
        report,
        RecoveryReport {
            resubmitted: 1,
            skipped: 1,
            failed: 0
        }
    );
    assert_eq!(submitter.ids(), vec!["stuck-new"]);
    assert_eq!(jobs.job(&"stuck-new".into()).status, JobStatus::Pending);
    assert_eq!(jobs.job(&"stuck-old".into()).status, JobStatus::Processing);
}

#[tokio::test]
async fn test_processing_jobs_ignored_by_default() {
    let jobs = Arc::new(MemoryJobStore::default());
    jobs.insert(job("stuck", "listing-1", JobStatus::Processing, 30));

    let submitter = Arc::new(RecordingSubmitter::default());
    let report = scanner(&jobs, &submitter, RecoveryConfig::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report, RecoveryReport::default());
    assert_eq!(jobs.job(&"stuck".into()).status, JobStatus::Processing);
}

#[tokio::test]
async fn test_submit_failure_is_counted() {
    let jobs = Arc::new(MemoryJobStore::default());
    jobs.insert(job("a", "listing-a", JobStatus::Pending, 2));
    jobs.insert(job("b", "listing-b", JobStatus::Pending, 1));

    let submitter = Arc::new(RecordingSubmitter {
        fail_for: Some("b".into()),
        ..RecordingSubmitter::default()
    });
    let report = scanner(&jobs, &submitter, RecoveryConfig::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.resubmitted, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(submitter.ids(), vec!["a"]);
}

#[tokio::test]
async fn test_limit_bounds_candidates() {
    let jobs = Arc::new(MemoryJobStore::default());
    for i in 0..4 {
        jobs.insert(job(&format!("job-{}", i), &format!("listing-{}", i), JobStatus::Pending, i));
    }

    let submitter = Arc::new(RecordingSubmitter::default());
    let config = RecoveryConfig {
        limit: 2,
        ..RecoveryConfig::default()
    };
    let report = scanner(&jobs, &submitter, config).run().await.unwrap();

    assert_eq!(report.resubmitted, 2);
    assert_eq!(submitter.ids(), vec!["job-0", "job-1"]);
}

#[tokio::test]
async fn test_disabled_scan_does_nothing() {
    let jobs = Arc::new(MemoryJobStore::default());
    jobs.insert(job("a", "listing-a", JobStatus::Pending, 2));

    let submitter = Arc::new(RecordingSubmitter::default());
    let config = RecoveryConfig {
        enabled: false,
        ..RecoveryConfig::default()
    };
    let report = scanner(&jobs, &submitter, config).run().await.unwrap();

    assert_eq!(report, RecoveryReport::default());
    assert!(submitter.ids().is_empty());
}

#[tokio::test]
async fn test_inline_submitter_runs_pipeline() {
    let h = Harness::new();
    let job = h.create_job("wave", &[], &five_photos());

    let orchestrator = Arc::new(h.orchestrator);
    let scanner = RecoveryScanner::new(h.jobs.clone(), orchestrator, RecoveryConfig::default());
    let report = scanner.run().await.unwrap();

    assert_eq!(report.resubmitted, 1);
    assert_eq!(h.jobs.job(&job.id).status, JobStatus::Completed);
}
