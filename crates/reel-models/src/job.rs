//! Job records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::job_status::JobStatus;
use crate::metadata::JobMetadata;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One user-visible unit of work producing finished videos for a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,
    pub listing_id: String,
    pub user_id: String,
    #[serde(default)]
    pub status: JobStatus,
    /// 0-100
    #[serde(default)]
    pub progress: u8,
    /// Primary template surfaced to the caller
    pub template: String,
    /// Ordered object keys of the input photos
    pub input_files: Vec<String>,
    /// Primary result location; set iff status is Completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: JobMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a PENDING job from a creation request.
    pub fn from_new(new: NewJob) -> Self {
        let now = Utc::now();
        Self {
            id: new.id.unwrap_or_default(),
            listing_id: new.listing_id,
            user_id: new.user_id,
            status: JobStatus::Pending,
            progress: 0,
            template: new.template,
            input_files: new.input_files,
            output_file: None,
            error: None,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a partial update in place (used by in-memory stores and tests).
    pub fn apply(&mut self, update: &JobUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        if update.clear_output_file {
            self.output_file = None;
        }
        if let Some(ref output) = update.output_file {
            self.output_file = Some(output.clone());
        }
        if update.clear_error {
            self.error = None;
        }
        if let Some(ref error) = update.error {
            self.error = Some(error.clone());
        }
        if let Some(ref metadata) = update.metadata {
            self.metadata = metadata.clone();
        }
        if let Some(completed_at) = update.completed_at {
            self.completed_at = Some(completed_at);
        }
        self.updated_at = Utc::now();
    }
}

/// Request to create a job. Issued by the external request layer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NewJob {
    /// Caller-chosen id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    pub listing_id: String,
    pub user_id: String,
    pub template: String,
    pub input_files: Vec<String>,
    #[serde(default)]
    pub metadata: JobMetadata,
}

impl NewJob {
    pub fn new(
        listing_id: impl Into<String>,
        user_id: impl Into<String>,
        template: impl Into<String>,
        input_files: Vec<String>,
    ) -> Self {
        Self {
            id: None,
            listing_id: listing_id.into(),
            user_id: user_id.into(),
            template: template.into(),
            input_files,
            metadata: JobMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: JobMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Partial job update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub output_file: Option<String>,
    /// Reset `output_file` (applied before `output_file`)
    #[serde(default)]
    pub clear_output_file: bool,
    pub error: Option<String>,
    /// Reset `error` (applied before `error`)
    #[serde(default)]
    pub clear_error: bool,
    pub metadata: Option<JobMetadata>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn output_file(mut self, output: impl Into<String>) -> Self {
        self.output_file = Some(output.into());
        self
    }

    pub fn clear_output_file(mut self) -> Self {
        self.clear_output_file = true;
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.clear_error = true;
        self
    }

    pub fn metadata(mut self, metadata: JobMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    /// True when the update carries no changes.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
