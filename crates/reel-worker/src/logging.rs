//! Structured job logging.

use tracing::{error, info, warn, Span};

use reel_models::{JobId, PipelineStage, TemplateResult};

/// Logs run events with `job_id` / `operation` fields attached.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
}

impl JobLogger {
    /// `operation` is "execute" or "regenerate".
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Run started: {}", message
        );
    }

    pub fn log_stage(&self, stage: PipelineStage, units: usize) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            stage = stage.as_str(),
            units,
            "Entering stage"
        );
    }

    /// A photo dropped out of the clip set.
    pub fn log_clip_failure(&self, index: usize, source: &str, reason: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            photo_index = index,
            source = %source,
            "No clip for photo: {}", reason
        );
    }

    pub fn log_template_result(&self, result: &TemplateResult) {
        match &result.error {
            Some(reason) => warn!(
                job_id = %self.job_id,
                operation = %self.operation,
                template = %result.template,
                duration_ms = result.duration_ms,
                "Template failed: {}", reason
            ),
            None => info!(
                job_id = %self.job_id,
                operation = %self.operation,
                template = %result.template,
                duration_ms = result.duration_ms,
                from_cache = result.from_cache,
                "Template ready"
            ),
        }
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "{}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Run failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Run completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span for instrumenting a whole run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "pipeline_run",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_fields() {
        let job_id = JobId::from_string("job-7");
        let logger = JobLogger::new(&job_id, "regenerate");

        assert_eq!(logger.job_id(), "job-7");
        assert_eq!(logger.operation(), "regenerate");
    }
}
