//! Typed job metadata.
//!
//! The job store persists this as a free-form map; inside the pipeline it is
//! always handled through these types.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::coordinates::Coordinates;
use crate::job_status::PipelineStage;

/// Typed metadata carried on a job record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobMetadata {
    /// Current sub-stage while processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<PipelineStage>,

    /// Templates to produce. Empty means the registry default set.
    #[serde(default)]
    pub templates: Vec<String>,

    /// Coordinates for the flyover clip, if supplied by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,

    /// Per-photo clips, ordered by photo index
    #[serde(default)]
    pub clips: Vec<ClipRecord>,

    /// Photos whose clip could not be produced
    #[serde(default)]
    pub clip_failures: Vec<ClipFailure>,

    /// Durable location of the flyover clip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_video: Option<String>,

    /// Per-template outcome of the last run
    #[serde(default)]
    pub template_results: Vec<TemplateResult>,

    /// Set while a selective regeneration is running or after it finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regeneration: Option<RegenerationContext>,
}

impl JobMetadata {
    /// Clip record for a photo index, if one exists.
    pub fn clip_for(&self, index: usize) -> Option<&ClipRecord> {
        self.clips.iter().find(|c| c.index == index)
    }

    /// Templates that completed in the last run.
    pub fn successful_templates(&self) -> impl Iterator<Item = &TemplateResult> {
        self.template_results
            .iter()
            .filter(|r| r.status == TemplateOutcome::Completed)
    }
}

/// A generated per-photo clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipRecord {
    /// Index of the source photo in `Job::input_files`
    pub index: usize,
    /// Object key of the source photo
    pub source: String,
    /// Durable location of the clip
    pub location: String,
    /// Cache key the clip is stored under
    pub cache_key: String,
    /// Whether this run reused a cached clip
    #[serde(default)]
    pub from_cache: bool,
}

/// A photo whose clip could not be generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipFailure {
    pub index: usize,
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TemplateOutcome {
    Completed,
    Failed,
}

/// Outcome of composing and uploading one template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateResult {
    pub template: String,
    pub status: TemplateOutcome,
    /// Durable location of the finished video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time spent on composition and upload
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub from_cache: bool,
}

impl TemplateResult {
    pub fn completed(template: impl Into<String>, output: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            template: template.into(),
            status: TemplateOutcome::Completed,
            output: Some(output.into()),
            error: None,
            duration_ms,
            from_cache: false,
        }
    }

    pub fn failed(template: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            template: template.into(),
            status: TemplateOutcome::Failed,
            output: None,
            error: Some(error.into()),
            duration_ms,
            from_cache: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TemplateOutcome::Completed
    }
}

/// Selective regeneration bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RegenerationContext {
    /// Photo indices that were re-synthesized
    pub photo_indices: Vec<usize>,
    pub requested_at: DateTime<Utc>,
}
