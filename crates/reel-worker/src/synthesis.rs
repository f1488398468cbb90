//! Clip generation over the external generation services.
//!
//! Both generators follow the same protocol: submit (with retry), poll on a
//! fixed interval up to a bounded number of attempts, download the output
//! (with retry), and write it into the job's scratch directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use reel_models::Coordinates;
use reel_storage::ObjectStore;
use reel_synthesis::{GenerationRequest, GenerationService, SynthesisError, TaskState};

use crate::error::{PipelineError, PipelineResult};
use crate::resources::ResourceTracker;
use crate::retry::{Backoff, RetryPolicy};

/// Bounded polling schedule.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 60,
        }
    }
}

/// Why a generation task did not produce bytes.
enum TaskFailure {
    Rejected(String),
    TimedOut(u32),
    Error(PipelineError),
}

impl From<SynthesisError> for TaskFailure {
    fn from(e: SynthesisError) -> Self {
        TaskFailure::Error(e.into())
    }
}

fn record_outcome(service: &'static str, result: &'static str, started: Instant) {
    metrics::counter!("pipeline_synthesis_total", "service" => service, "result" => result)
        .increment(1);
    metrics::histogram!("pipeline_synthesis_duration_seconds", "service" => service)
        .record(started.elapsed().as_secs_f64());
}

/// Failed status checks back off linearly between the fixed poll intervals.
fn poll_retry_policy(retry: &RetryPolicy, service: &str) -> RetryPolicy {
    retry
        .named(format!("{}_poll", service))
        .with_backoff(Backoff::Linear)
}

/// Submit, poll and download one task.
async fn run_task(
    service: &dyn GenerationService,
    request: &GenerationRequest,
    poll: PollSettings,
    retry: &RetryPolicy,
) -> Result<Vec<u8>, TaskFailure> {
    let retryable = |e: &SynthesisError| e.is_retryable();

    let handle = retry
        .named(format!("{}_submit", service.name()))
        .run_if(retryable, || service.submit(request))
        .await?;
    debug!(service = service.name(), task = %handle, "Submitted generation task");

    let poll_retry = poll_retry_policy(retry, service.name());
    for attempt in 1..=poll.max_attempts {
        let status = poll_retry
            .run_if(retryable, || service.poll(&handle))
            .await?;

        match status.state {
            TaskState::Succeeded => {
                // Output URL presence is guaranteed by the service client.
                let url = status.output_url.unwrap_or_default();
                let bytes = retry
                    .named(format!("{}_download", service.name()))
                    .run_if(retryable, || service.download(&url))
                    .await?;
                debug!(service = service.name(), task = %handle, attempt, "Generation task finished");
                return Ok(bytes);
            }
            TaskState::Failed => {
                return Err(TaskFailure::Rejected(
                    status
                        .failure
                        .unwrap_or_else(|| "service reported failure".to_string()),
                ));
            }
            TaskState::Pending | TaskState::Running => {
                if attempt < poll.max_attempts {
                    tokio::time::sleep(poll.interval).await;
                }
            }
        }
    }

    Err(TaskFailure::TimedOut(poll.max_attempts))
}

async fn write_clip(path: &Path, bytes: &[u8], tracker: &ResourceTracker) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tracker.track(path);
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

fn image_mime_type(key: &str) -> &'static str {
    let ext = key.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

/// Photo to motion clip.
pub struct ClipGenerator {
    service: Arc<dyn GenerationService>,
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
    poll: PollSettings,
    clip_duration_secs: f64,
}

impl ClipGenerator {
    pub fn new(
        service: Arc<dyn GenerationService>,
        store: Arc<dyn ObjectStore>,
        retry: RetryPolicy,
        poll: PollSettings,
        clip_duration_secs: f64,
    ) -> Self {
        Self {
            service,
            store,
            retry,
            poll,
            clip_duration_secs,
        }
    }

    pub fn clip_duration_secs(&self) -> f64 {
        self.clip_duration_secs
    }

    /// Generate the clip for photo `index` into `work_dir/clip_{index}.mp4`.
    pub async fn generate(
        &self,
        image_key: &str,
        index: usize,
        work_dir: &Path,
        tracker: &ResourceTracker,
    ) -> PipelineResult<PathBuf> {
        let started = Instant::now();

        let image = self
            .retry
            .named("image_download")
            .run_if(|e: &reel_storage::StorageError| e.is_retryable(), || {
                self.store.get(image_key)
            })
            .await?;

        let request =
            GenerationRequest::image(image, image_mime_type(image_key), self.clip_duration_secs);

        let bytes = match run_task(self.service.as_ref(), &request, self.poll, &self.retry).await {
            Ok(bytes) => bytes,
            Err(failure) => {
                let (result, err) = match failure {
                    TaskFailure::Rejected(reason) => {
                        ("failed", PipelineError::SynthesisFailed { index, reason })
                    }
                    TaskFailure::TimedOut(attempts) => {
                        ("timeout", PipelineError::SynthesisTimeout { index, attempts })
                    }
                    TaskFailure::Error(e) => (
                        "error",
                        PipelineError::SynthesisFailed {
                            index,
                            reason: e.to_string(),
                        },
                    ),
                };
                record_outcome(self.service.name(), result, started);
                warn!(index, image = %image_key, "Clip synthesis failed: {}", err);
                return Err(err);
            }
        };

        let path = work_dir.join(format!("clip_{}.mp4", index));
        write_clip(&path, &bytes, tracker).await?;
        record_outcome(self.service.name(), "success", started);

        info!(
            index,
            image = %image_key,
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generated photo clip"
        );
        Ok(path)
    }
}

/// Coordinates to flyover clip.
pub struct FlyoverGenerator {
    service: Arc<dyn GenerationService>,
    retry: RetryPolicy,
    poll: PollSettings,
    clip_duration_secs: f64,
}

impl FlyoverGenerator {
    pub fn new(
        service: Arc<dyn GenerationService>,
        retry: RetryPolicy,
        poll: PollSettings,
        clip_duration_secs: f64,
    ) -> Self {
        Self {
            service,
            retry,
            poll,
            clip_duration_secs,
        }
    }

    pub fn clip_duration_secs(&self) -> f64 {
        self.clip_duration_secs
    }

    pub async fn generate(
        &self,
        coordinates: Coordinates,
        work_dir: &Path,
        tracker: &ResourceTracker,
    ) -> PipelineResult<PathBuf> {
        let started = Instant::now();
        let request = GenerationRequest::location(coordinates, self.clip_duration_secs);

        let bytes = match run_task(self.service.as_ref(), &request, self.poll, &self.retry).await {
            Ok(bytes) => bytes,
            Err(failure) => {
                let (result, reason) = match failure {
                    TaskFailure::Rejected(reason) => ("failed", reason),
                    TaskFailure::TimedOut(attempts) => {
                        ("timeout", format!("not finished after {} polls", attempts))
                    }
                    TaskFailure::Error(e) => ("error", e.to_string()),
                };
                record_outcome(self.service.name(), result, started);
                return Err(PipelineError::FlyoverFailed(reason));
            }
        };

        let path = work_dir.join("flyover.mp4");
        write_clip(&path, &bytes, tracker).await?;
        record_outcome(self.service.name(), "success", started);

        info!(
            coordinates = %coordinates.canonical(),
            bytes = bytes.len(),
            "Generated flyover clip"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_retries_back_off_linearly() {
        let retry = RetryPolicy::new("pipeline").with_base_delay(Duration::from_millis(200));
        let policy = poll_retry_policy(&retry, "synthesis");

        assert_eq!(policy.operation_name, "synthesis_poll");
        assert_eq!(policy.backoff, Backoff::Linear);
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(600));
        assert_eq!(retry.backoff, Backoff::ExponentialJitter);
    }

    #[test]
    fn test_image_mime_type() {
        assert_eq!(image_mime_type("photos/a.JPG"), "image/jpeg");
        assert_eq!(image_mime_type("photos/a.png"), "image/png");
        assert_eq!(image_mime_type("photos/noext"), "application/octet-stream");
    }
}
