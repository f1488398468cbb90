//! Shared data models for the listing reel pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, job status and typed job metadata
//! - Processed asset (cache) entries
//! - Geographic coordinates
//! - The template registry and clip sequencing rules

pub mod asset;
pub mod coordinates;
pub mod job;
pub mod job_status;
pub mod metadata;
pub mod template;

// Re-export common types
pub use asset::{AssetMetadata, AssetType, ProcessedAsset};
pub use coordinates::{Coordinates, CoordinatesError};
pub use job::{Job, JobId, JobUpdate, NewJob};
pub use job_status::{JobStatus, PipelineStage};
pub use metadata::{
    ClipFailure, ClipRecord, JobMetadata, RegenerationContext, TemplateOutcome, TemplateResult,
};
pub use template::{
    ClipSlot, RequirementViolation, TemplateDefinition, TemplateError, TemplateRegistry,
};
