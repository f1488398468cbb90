//! Task types carried on the queue.

use chrono::{DateTime, Utc};
use reel_models::JobId;
use serde::{Deserialize, Serialize};

/// Run the full pipeline for an existing PENDING job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteJob {
    pub job_id: JobId,
    /// Overrides the job's own fan-out list when non-empty
    #[serde(default)]
    pub templates: Vec<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl ExecuteJob {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            templates: Vec::new(),
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_templates(mut self, templates: Vec<String>) -> Self {
        self.templates = templates;
        self
    }

    /// A job is executed at most once per dedup window.
    pub fn idempotency_key(&self) -> String {
        format!("execute:{}", self.job_id)
    }
}

/// Re-synthesize selected photos of a finished job and recompose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerateJob {
    pub job_id: JobId,
    pub photo_indices: Vec<usize>,
    /// `None` recomposes the job's own templates
    #[serde(default)]
    pub templates: Option<Vec<String>>,
    pub requested_at: DateTime<Utc>,
}

impl RegenerateJob {
    pub fn new(job_id: JobId, photo_indices: Vec<usize>, templates: Option<Vec<String>>) -> Self {
        Self {
            job_id,
            photo_indices,
            templates,
            requested_at: Utc::now(),
        }
    }

    /// Identical requests within the same second collapse; later ones do not.
    pub fn idempotency_key(&self) -> String {
        let mut indices = self.photo_indices.clone();
        indices.sort_unstable();
        indices.dedup();
        let indices = indices
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join(",");

        format!(
            "regenerate:{}:{}:{}",
            self.job_id,
            indices,
            self.requested_at.timestamp()
        )
    }
}

/// Queue payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineTask {
    Execute(ExecuteJob),
    Regenerate(RegenerateJob),
}

impl PipelineTask {
    pub fn job_id(&self) -> &JobId {
        match self {
            PipelineTask::Execute(t) => &t.job_id,
            PipelineTask::Regenerate(t) => &t.job_id,
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            PipelineTask::Execute(t) => t.idempotency_key(),
            PipelineTask::Regenerate(t) => t.idempotency_key(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineTask::Execute(_) => "execute",
            PipelineTask::Regenerate(_) => "regenerate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_is_tagged() {
        let task = PipelineTask::Execute(ExecuteJob::new(JobId::from_string("job-1")));
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "execute");
        assert_eq!(json["job_id"], "job-1");

        let decoded: PipelineTask = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn test_regenerate_payload_without_templates() {
        let json = serde_json::json!({
            "type": "regenerate",
            "job_id": "job-2",
            "photo_indices": [3, 1],
            "requested_at": "2024-05-01T12:00:00Z"
        });
        let task: PipelineTask = serde_json::from_value(json).unwrap();
        match task {
            PipelineTask::Regenerate(ref r) => {
                assert_eq!(r.photo_indices, vec![3, 1]);
                assert!(r.templates.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert_eq!(task.kind(), "regenerate");
    }

    #[test]
    fn test_regenerate_key_ignores_index_order() {
        let id = JobId::from_string("job-3");
        let mut a = RegenerateJob::new(id.clone(), vec![4, 1, 1], None);
        let mut b = RegenerateJob::new(id, vec![1, 4], Some(vec!["wave".into()]));
        b.requested_at = a.requested_at;
        assert_eq!(a.idempotency_key(), b.idempotency_key());

        a.requested_at += chrono::Duration::seconds(5);
        assert_ne!(a.idempotency_key(), b.idempotency_key());
    }
}
