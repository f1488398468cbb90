//! Redis Streams task queue.
//!
//! This crate provides:
//! - Task enqueueing with idempotency-key deduplication
//! - Consumer-group consumption and acknowledgement
//! - Reclaiming entries left pending by crashed workers

pub mod error;
pub mod queue;
pub mod task;

pub use error::{QueueError, QueueResult};
pub use queue::{JobQueue, QueueConfig};
pub use task::{ExecuteJob, PipelineTask, RegenerateJob};
