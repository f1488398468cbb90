//! Listing reel pipeline worker.
//!
//! This crate provides:
//! - Retry executor and transient resource tracking
//! - Artifact cache over the object store and asset index
//! - Photo and flyover clip generation
//! - Template composition, orchestration and selective regeneration
//! - Startup recovery and the queue executor

pub mod asset_cache;
pub mod composer;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod recovery;
pub mod regeneration;
pub mod resources;
pub mod retry;
pub mod synthesis;

pub use asset_cache::{derive_key, AssetCache, CacheKeyInput, CacheOutcome};
pub use composer::{FfmpegComposer, TemplateComposer};
pub use config::{CacheConfig, PipelineConfig, RecoveryConfig, WorkerConfig};
pub use error::{PipelineError, PipelineResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use pipeline::{ExecuteOptions, Orchestrator, PipelineDeps, RunSummary};
pub use progress::ProgressTracker;
pub use recovery::{JobSubmitter, QueueSubmitter, RecoveryReport, RecoveryScanner};
pub use regeneration::{merge_clips, RegenerateRequest, RegenerateScope};
pub use resources::ResourceTracker;
pub use retry::{Backoff, RetryPolicy};
pub use synthesis::{ClipGenerator, FlyoverGenerator, PollSettings};
