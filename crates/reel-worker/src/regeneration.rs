//! Selective regeneration.
//!
//! Re-synthesizes a chosen subset of photos and re-composes templates over the
//! merged clip set. Photos outside the subset reuse their recorded clips.

use std::collections::BTreeSet;

use chrono::Utc;

use reel_models::{ClipRecord, Job, JobId, JobStatus, RegenerationContext};

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{
    resolve_template_names, Orchestrator, RunRequest, RunSummary, TemplateSelection,
};

/// Templates a regeneration re-composes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RegenerateScope {
    /// The job's resolved template list
    #[default]
    Job,
    /// Exactly these templates
    Templates(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerateRequest {
    pub photo_indices: Vec<usize>,
    pub scope: RegenerateScope,
}

impl RegenerateRequest {
    pub fn new(photo_indices: Vec<usize>) -> Self {
        Self {
            photo_indices,
            scope: RegenerateScope::Job,
        }
    }

    pub fn with_templates(mut self, templates: Vec<String>) -> Self {
        self.scope = RegenerateScope::Templates(templates);
        self
    }
}

/// Sorted, deduplicated indices, each below `photo_count`.
pub fn validate_indices(indices: &[usize], photo_count: usize) -> PipelineResult<Vec<usize>> {
    if indices.is_empty() {
        return Err(PipelineError::validation("no photo indices to regenerate"));
    }
    if let Some(bad) = indices.iter().find(|&&i| i >= photo_count) {
        return Err(PipelineError::validation(format!(
            "photo index {} out of range (job has {} photos)",
            bad, photo_count
        )));
    }
    let unique: BTreeSet<usize> = indices.iter().copied().collect();
    Ok(unique.into_iter().collect())
}

/// Replace exactly the regenerated indices, keeping photo order.
pub fn merge_clips(existing: &[ClipRecord], regenerated: &[ClipRecord]) -> Vec<ClipRecord> {
    let mut merged: Vec<ClipRecord> = existing
        .iter()
        .filter(|c| !regenerated.iter().any(|r| r.index == c.index))
        .cloned()
        .collect();
    merged.extend(regenerated.iter().cloned());
    merged.sort_by_key(|c| c.index);
    merged
}

/// Records for the clips a regeneration run actually composed.
///
/// Forced indices take this run's record. Other indices keep their earlier
/// record when it still points at the clip that was composed. Indices that
/// produced no clip in this run are dropped, so every index is either here or
/// in the run's clip failures.
pub(crate) fn clip_records_after_run(
    existing: &[ClipRecord],
    produced: &[ClipRecord],
    force: &BTreeSet<usize>,
) -> Vec<ClipRecord> {
    let regenerated: Vec<ClipRecord> = produced
        .iter()
        .filter(|r| force.contains(&r.index))
        .cloned()
        .collect();
    let mut records = merge_clips(existing, &regenerated);
    records.retain(|c| {
        produced
            .iter()
            .any(|p| p.index == c.index && p.location == c.location)
    });
    for record in produced {
        if !records.iter().any(|c| c.index == record.index) {
            records.push(record.clone());
        }
    }
    records.sort_by_key(|c| c.index);
    records
}

impl Orchestrator {
    pub async fn regenerate(
        &self,
        job_id: &JobId,
        request: RegenerateRequest,
    ) -> PipelineResult<RunSummary> {
        let job = self.load_job(job_id).await?;
        self.regenerate_job(job, request).await
    }

    /// Request errors are returned without touching the job; errors during
    /// the run mark it FAILED like [`Orchestrator::execute`].
    pub async fn regenerate_job(
        &self,
        job: Job,
        request: RegenerateRequest,
    ) -> PipelineResult<RunSummary> {
        if matches!(job.status, JobStatus::Pending | JobStatus::Processing) {
            return Err(PipelineError::validation(format!(
                "job {} is {}; regeneration needs a finished job",
                job.id, job.status
            )));
        }

        let indices = validate_indices(&request.photo_indices, job.input_files.len())?;

        let names = match &request.scope {
            RegenerateScope::Job => resolve_template_names(self.registry(), &job, &[])?,
            RegenerateScope::Templates(list) => {
                let mut names: Vec<String> = Vec::with_capacity(list.len());
                for name in list {
                    if self.registry().get(name).is_none() {
                        return Err(PipelineError::validation(format!(
                            "unknown template '{}'",
                            name
                        )));
                    }
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
                if names.is_empty() {
                    return Err(PipelineError::validation("no templates to regenerate"));
                }
                names
            }
        };

        let retained = job
            .metadata
            .template_results
            .iter()
            .filter(|r| !names.contains(&r.template))
            .cloned()
            .collect();

        let run = RunRequest {
            operation: "regenerate",
            selection: TemplateSelection::Exact(names),
            force: indices.iter().copied().collect(),
            retained,
            regeneration: Some(RegenerationContext {
                photo_indices: indices,
                requested_at: Utc::now(),
            }),
        };
        self.drive(job, run).await
    }
}
