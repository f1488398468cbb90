//! Pipeline error types.

use thiserror::Error;

use reel_models::{JobId, JobStatus, TemplateError};

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {job_id} is already {status}")]
    JobTerminal { job_id: JobId, status: JobStatus },

    #[error("Clip synthesis failed for photo {index}: {reason}")]
    SynthesisFailed { index: usize, reason: String },

    #[error("Clip synthesis for photo {index} did not finish after {attempts} polls")]
    SynthesisTimeout { index: usize, attempts: u32 },

    #[error("Flyover generation failed: {0}")]
    FlyoverFailed(String),

    #[error("Template {template} failed: {reason}")]
    TemplateCompositionFailed { template: String, reason: String },

    #[error("No clips could be generated: {}", .failures.join("; "))]
    NoSuccessfulClips { failures: Vec<String> },

    #[error("No templates could be composed: {}", .failures.join("; "))]
    NoSuccessfulTemplates { failures: Vec<String> },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] reel_storage::StorageError),

    #[error("Job store error: {0}")]
    Store(#[from] reel_firestore::FirestoreError),

    #[error("Media error: {0}")]
    Media(#[from] reel_media::MediaError),

    #[error("Generation service error: {0}")]
    Synthesis(#[from] reel_synthesis::SynthesisError),

    #[error("Queue error: {0}")]
    Queue(#[from] reel_queue::QueueError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn composition_failed(template: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TemplateCompositionFailed {
            template: template.into(),
            reason: reason.into(),
        }
    }

    /// Transient infrastructure failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Storage(e) => e.is_retryable(),
            PipelineError::Store(e) => e.is_retryable(),
            PipelineError::Synthesis(e) => e.is_retryable(),
            PipelineError::Queue(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Errors caused by the request itself rather than by the pipeline.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PipelineError::Validation(_) | PipelineError::Template(_)
        )
    }
}
