//! Pipeline orchestration.
//!
//! A run moves a job `PENDING -> PROCESSING -> {COMPLETED | FAILED}`:
//! resolve templates, generate per-photo clips, generate the flyover when a
//! template uses one, compose every template, upload, finalize. Per-photo and
//! per-template failures are recorded and siblings continue; a stage with no
//! success at all fails the job. Scratch files are removed whatever happens.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use reel_firestore::{JobStore, ListingLookup};
use reel_models::{
    Job, JobId, JobMetadata, JobStatus, JobUpdate, PipelineStage, RegenerationContext,
    TemplateRegistry, TemplateResult,
};
use reel_queue::PipelineTask;
use reel_storage::ObjectStore;

use crate::asset_cache::AssetCache;
use crate::composer::TemplateComposer;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::JobLogger;
use crate::progress::ProgressTracker;
use crate::regeneration::{RegenerateRequest, RegenerateScope};
use crate::resources::ResourceTracker;
use crate::retry::RetryPolicy;
use crate::synthesis::{ClipGenerator, FlyoverGenerator};

mod clips;
mod compose;
mod templates;

pub use clips::{flyover_cache_key, photo_clip_cache_key};
pub use compose::template_cache_key;
pub use templates::resolve_template_names;

/// Progress checkpoints.
pub(crate) const PROGRESS_STARTED: u8 = 5;
pub(crate) const PROGRESS_CLIPS_DONE: u8 = 60;
pub(crate) const PROGRESS_FLYOVER_DONE: u8 = 65;
pub(crate) const PROGRESS_TEMPLATES_DONE: u8 = 95;

/// Collaborators of the orchestrator.
pub struct PipelineDeps {
    pub jobs: Arc<dyn JobStore>,
    pub listings: Arc<dyn ListingLookup>,
    pub store: Arc<dyn ObjectStore>,
    pub clip_generator: Arc<ClipGenerator>,
    /// Unset when no flyover service is configured
    pub flyover_generator: Option<Arc<FlyoverGenerator>>,
    pub composer: Arc<dyn TemplateComposer>,
    pub registry: Arc<TemplateRegistry>,
}

/// Caller overrides for [`Orchestrator::execute`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Fan-out list; empty falls back to the job metadata, then the registry default set
    pub templates: Vec<String>,
}

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub job_id: JobId,
    pub output_file: String,
    pub template_results: Vec<TemplateResult>,
    pub clip_failures: usize,
    pub duration_ms: u64,
}

/// Which templates a run composes.
#[derive(Debug, Clone)]
pub(crate) enum TemplateSelection {
    /// Resolve from caller overrides, job metadata and registry defaults
    Requested(Vec<String>),
    /// Exactly these, already validated
    Exact(Vec<String>),
}

/// What one run should do beyond the defaults.
#[derive(Debug, Clone)]
pub(crate) struct RunRequest {
    pub operation: &'static str,
    pub selection: TemplateSelection,
    /// Photo indices that must be re-synthesized
    pub force: BTreeSet<usize>,
    /// Results of templates outside this run, carried into the job record
    pub retained: Vec<TemplateResult>,
    pub regeneration: Option<RegenerationContext>,
}

impl RunRequest {
    fn execute(options: ExecuteOptions) -> Self {
        Self {
            operation: "execute",
            selection: TemplateSelection::Requested(options.templates),
            force: BTreeSet::new(),
            retained: Vec::new(),
            regeneration: None,
        }
    }
}

/// Per-run state shared by the stages.
pub(crate) struct JobRun<'a> {
    pub job: &'a Job,
    pub work_dir: PathBuf,
    pub tracker: ResourceTracker,
    pub progress: ProgressTracker,
    pub logger: JobLogger,
}

/// Drives jobs through the pipeline.
pub struct Orchestrator {
    pub(crate) deps: PipelineDeps,
    pub(crate) cache: AssetCache,
    pub(crate) config: PipelineConfig,
    pub(crate) retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(deps: PipelineDeps, cache: AssetCache, config: PipelineConfig) -> Self {
        let retry = RetryPolicy::new("pipeline")
            .with_max_attempts(config.transfer_attempts)
            .with_base_delay(config.retry_base_delay);
        Self {
            deps,
            cache,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.deps.registry
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.deps.jobs
    }

    /// Fetch a job, retrying transient store errors.
    pub async fn load_job(&self, job_id: &JobId) -> PipelineResult<Job> {
        self.retry
            .named("job_get")
            .run_if(|e: &reel_firestore::FirestoreError| e.is_retryable(), || {
                self.deps.jobs.get(job_id)
            })
            .await?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.clone()))
    }

    /// Run a job end to end. Terminal jobs are rejected untouched; any other
    /// error is written to the job as FAILED and returned.
    pub async fn execute(&self, job: Job, options: ExecuteOptions) -> PipelineResult<RunSummary> {
        if job.is_terminal() {
            return Err(PipelineError::JobTerminal {
                job_id: job.id.clone(),
                status: job.status,
            });
        }
        self.drive(job, RunRequest::execute(options)).await
    }

    /// Dispatch one queue task.
    ///
    /// Errors are returned only when the task should stay on the queue (the
    /// job could not be read). A job that ran and failed is already recorded
    /// as FAILED, so the task is done.
    pub async fn handle(&self, task: &PipelineTask) -> PipelineResult<()> {
        match task {
            PipelineTask::Execute(t) => {
                let job = self.load_job(&t.job_id).await?;
                if job.is_terminal() {
                    info!(job_id = %job.id, status = %job.status, "Skipping task for terminal job");
                    return Ok(());
                }
                let options = ExecuteOptions {
                    templates: t.templates.clone(),
                };
                if let Err(e) = self.execute(job, options).await {
                    warn!(job_id = %t.job_id, "Execution finished with error: {}", e);
                }
                Ok(())
            }
            PipelineTask::Regenerate(t) => {
                let job = self.load_job(&t.job_id).await?;
                let scope = match &t.templates {
                    Some(list) => RegenerateScope::Templates(list.clone()),
                    None => RegenerateScope::Job,
                };
                let request = RegenerateRequest {
                    photo_indices: t.photo_indices.clone(),
                    scope,
                };
                if let Err(e) = self.regenerate_job(job, request).await {
                    warn!(job_id = %t.job_id, "Regeneration finished with error: {}", e);
                }
                Ok(())
            }
        }
    }

    /// Run wrapper: scratch space, span, failure recording, cleanup.
    pub(crate) async fn drive(&self, job: Job, request: RunRequest) -> PipelineResult<RunSummary> {
        let logger = JobLogger::new(&job.id, request.operation);
        let span = logger.create_span();

        async {
            let started = Instant::now();
            let work_dir = self
                .config
                .work_dir
                .join(format!("{}-{}", job.id, Uuid::new_v4()));

            let run = JobRun {
                job: &job,
                work_dir,
                tracker: ResourceTracker::new(),
                progress: ProgressTracker::new(
                    Arc::clone(&self.deps.jobs),
                    job.id.clone(),
                    self.config.progress_flush_every,
                    0,
                ),
                logger,
            };
            run.tracker.track_dir(&run.work_dir);
            run.logger.log_start(&format!(
                "{} photos, primary template '{}'",
                job.input_files.len(),
                job.template
            ));

            let mut metadata = job.metadata.clone();
            let result = self.run(&run, &request, &mut metadata, started).await;

            let status = match &result {
                Ok(summary) => {
                    run.logger.log_completion(&format!(
                        "{} templates, output {}",
                        summary.template_results.iter().filter(|r| r.is_success()).count(),
                        summary.output_file
                    ));
                    JobStatus::Completed
                }
                Err(e) => {
                    run.logger.log_error(&e.to_string());
                    // A failed job keeps the progress it reached.
                    run.progress.flush().await;
                    self.mark_failed(&job.id, e, metadata).await;
                    JobStatus::Failed
                }
            };
            metrics::counter!("pipeline_jobs_total", "status" => status.as_str()).increment(1);
            metrics::histogram!("pipeline_job_duration_seconds", "operation" => request.operation)
                .record(started.elapsed().as_secs_f64());

            let removed = run.tracker.cleanup().await;
            if removed > 0 {
                debug!(job_id = %job.id, removed, "Removed scratch files");
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        run: &JobRun<'_>,
        request: &RunRequest,
        metadata: &mut JobMetadata,
        started: Instant,
    ) -> PipelineResult<RunSummary> {
        let job = run.job;
        if job.input_files.is_empty() {
            return Err(PipelineError::validation("job has no input photos"));
        }

        // 1. Templates
        let names = match &request.selection {
            TemplateSelection::Requested(requested) => {
                let names = resolve_template_names(&self.deps.registry, job, requested)?;
                metadata.templates = names.clone();
                names
            }
            TemplateSelection::Exact(names) => names.clone(),
        };
        let plan = templates::plan(self, job, &names, metadata).await?;

        // 2. Start processing
        tokio::fs::create_dir_all(&run.work_dir).await?;
        metadata.current_stage = Some(PipelineStage::Synthesis);
        metadata.regeneration = request.regeneration.clone();
        self.update_job(
            &job.id,
            JobUpdate::new()
                .status(JobStatus::Processing)
                .progress(PROGRESS_STARTED)
                .clear_error()
                .clear_output_file()
                .metadata(metadata.clone()),
        )
        .await?;
        run.progress.mark_written(PROGRESS_STARTED).await;

        // 3. Photo clips
        run.logger.log_stage(PipelineStage::Synthesis, job.input_files.len());
        let clip_stage = clips::generate_clips(self, run, metadata, &request.force).await;
        metadata.clip_failures = clip_stage.failures.clone();
        let produced = clip_stage.records();
        metadata.clips = if request.force.is_empty() {
            produced
        } else {
            crate::regeneration::clip_records_after_run(&metadata.clips, &produced, &request.force)
        };
        if clip_stage.clips.is_empty() {
            return Err(PipelineError::NoSuccessfulClips {
                failures: clip_stage
                    .failures
                    .iter()
                    .map(|f| format!("photo {}: {}", f.index, f.reason))
                    .collect(),
            });
        }
        run.progress.advance(PROGRESS_CLIPS_DONE).await;

        // 4. Flyover
        let flyover = match plan.coordinates {
            Some(coordinates) if plan.wants_flyover => {
                match clips::produce_flyover(self, run, coordinates, metadata).await {
                    Ok(flyover) => Some(flyover),
                    Err(e) => {
                        run.logger.log_warning(&format!("Flyover unavailable: {}", e));
                        None
                    }
                }
            }
            _ => None,
        };
        run.progress.advance(PROGRESS_FLYOVER_DONE).await;

        // 5-6. Compose and upload
        metadata.current_stage = Some(PipelineStage::Template);
        self.save_metadata(&job.id, metadata).await;
        run.logger.log_stage(PipelineStage::Template, plan.runnable.len());

        let composed =
            compose::compose_templates(self, run, &plan.runnable, &clip_stage.clips, flyover.as_ref())
                .await;

        let mut results = plan.rejected.clone();
        results.extend(composed);
        let successes_this_run = results.iter().filter(|r| r.is_success()).count();

        results.extend(
            request
                .retained
                .iter()
                .filter(|r| !names.contains(&r.template))
                .cloned(),
        );
        let order = |r: &TemplateResult| {
            names
                .iter()
                .position(|n| n == &r.template)
                .unwrap_or(usize::MAX)
        };
        results.sort_by_key(order);
        metadata.template_results = results.clone();

        // 7. Finalize
        if successes_this_run == 0 {
            return Err(PipelineError::NoSuccessfulTemplates {
                failures: results
                    .iter()
                    .filter(|r| names.contains(&r.template))
                    .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {}", r.template, e)))
                    .collect(),
            });
        }

        let output_file = results
            .iter()
            .find(|r| r.is_success() && r.template == job.template)
            .or_else(|| results.iter().find(|r| r.is_success()))
            .and_then(|r| r.output.clone())
            .ok_or_else(|| PipelineError::validation("successful template has no output"))?;

        metadata.current_stage = Some(PipelineStage::Upload);
        self.update_job(
            &job.id,
            JobUpdate::new()
                .status(JobStatus::Completed)
                .progress(100)
                .output_file(output_file.clone())
                .clear_error()
                .completed_at(Utc::now())
                .metadata(metadata.clone()),
        )
        .await?;
        run.progress.mark_written(100).await;

        Ok(RunSummary {
            job_id: job.id.clone(),
            output_file,
            template_results: results,
            clip_failures: metadata.clip_failures.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    pub(crate) async fn update_job(&self, job_id: &JobId, update: JobUpdate) -> PipelineResult<()> {
        self.retry
            .named("job_update")
            .run_if(|e: &reel_firestore::FirestoreError| e.is_retryable(), || {
                self.deps.jobs.update(job_id, update.clone())
            })
            .await?;
        Ok(())
    }

    /// Best-effort metadata checkpoint.
    async fn save_metadata(&self, job_id: &JobId, metadata: &JobMetadata) {
        let update = JobUpdate::new().metadata(metadata.clone());
        if let Err(e) = self.deps.jobs.update(job_id, update).await {
            warn!(job_id = %job_id, "Failed to checkpoint metadata: {}", e);
        }
    }

    /// Record a terminal failure. Never fails; a write error is logged.
    async fn mark_failed(&self, job_id: &JobId, error: &PipelineError, metadata: JobMetadata) {
        let update = JobUpdate::new()
            .status(JobStatus::Failed)
            .error(error.to_string())
            .clear_output_file()
            .metadata(metadata);

        if let Err(e) = self.update_job(job_id, update).await {
            error!(job_id = %job_id, "Failed to mark job as failed: {}", e);
        }
    }
}
