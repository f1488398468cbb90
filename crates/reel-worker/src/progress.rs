//! Buffered, monotonic job progress.
//!
//! Stage completions advance an in-memory value; the job record is written
//! every `flush_every` advances, when 100 is reached, or on an explicit flush.
//! Written values never decrease.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use reel_firestore::JobStore;
use reel_models::{JobId, JobUpdate};

#[derive(Debug, Default)]
struct ProgressState {
    current: u8,
    written: u8,
    pending_advances: u32,
}

pub struct ProgressTracker {
    jobs: Arc<dyn JobStore>,
    job_id: JobId,
    flush_every: u32,
    state: Mutex<ProgressState>,
}

impl ProgressTracker {
    /// `initial` is the progress already stored on the job.
    pub fn new(jobs: Arc<dyn JobStore>, job_id: JobId, flush_every: u32, initial: u8) -> Self {
        let initial = initial.min(100);
        Self {
            jobs,
            job_id,
            flush_every: flush_every.max(1),
            state: Mutex::new(ProgressState {
                current: initial,
                written: initial,
                pending_advances: 0,
            }),
        }
    }

    /// Raise progress to `to`. Lower values are ignored.
    pub async fn advance(&self, to: u8) {
        let mut state = self.state.lock().await;
        let to = to.min(100);
        if to <= state.current {
            return;
        }
        state.current = to;
        state.pending_advances += 1;

        if state.pending_advances >= self.flush_every || to == 100 {
            self.write(&mut state).await;
        }
    }

    /// Persist the current value if it has not been written yet.
    pub async fn flush(&self) {
        let mut state = self.state.lock().await;
        self.write(&mut state).await;
    }

    /// Record a value written by another update (e.g. the terminal one).
    pub async fn mark_written(&self, value: u8) {
        let mut state = self.state.lock().await;
        state.current = state.current.max(value);
        state.written = state.written.max(value);
        state.pending_advances = 0;
    }

    async fn write(&self, state: &mut ProgressState) {
        if state.current <= state.written {
            state.pending_advances = 0;
            return;
        }

        let value = state.current;
        match self
            .jobs
            .update(&self.job_id, JobUpdate::new().progress(value))
            .await
        {
            Ok(()) => {
                debug!(job_id = %self.job_id, progress = value, "Progress written");
                state.written = value;
                state.pending_advances = 0;
            }
            // Progress is advisory; the next flush retries.
            Err(e) => warn!(job_id = %self.job_id, "Failed to write progress: {}", e),
        }
    }
}

/// Linear interpolation of `done / total` into `[start, end]`.
pub fn stage_progress(start: u8, end: u8, done: usize, total: usize) -> u8 {
    if total == 0 || end <= start {
        return end.max(start);
    }
    let span = (end - start) as usize;
    start + (span * done.min(total) / total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_progress() {
        assert_eq!(stage_progress(5, 60, 0, 5), 5);
        assert_eq!(stage_progress(5, 60, 5, 5), 60);
        assert_eq!(stage_progress(5, 60, 2, 4), 32);
        assert_eq!(stage_progress(65, 95, 7, 3), 95);
        assert_eq!(stage_progress(65, 95, 0, 0), 95);
    }
}
