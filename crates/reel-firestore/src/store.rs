//! Storage seams for the pipeline's durable records.
//!
//! The worker depends on these traits only; Firestore implementations live in
//! sibling modules and tests substitute in-memory versions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use reel_models::{Coordinates, Job, JobId, JobStatus, JobUpdate, NewJob, ProcessedAsset};

use crate::error::FirestoreResult;

/// Durable job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a PENDING job.
    async fn create(&self, new_job: NewJob) -> FirestoreResult<Job>;

    async fn get(&self, id: &JobId) -> FirestoreResult<Option<Job>>;

    /// Apply a partial update. Fails with `NotFound` for unknown jobs.
    async fn update(&self, id: &JobId, update: JobUpdate) -> FirestoreResult<()>;

    /// Jobs in `status` created at or after `since`, newest first.
    async fn list_by_status_since(
        &self,
        status: JobStatus,
        since: DateTime<Utc>,
        limit: usize,
    ) -> FirestoreResult<Vec<Job>>;

    async fn list_processing_by_listing(&self, listing_id: &str) -> FirestoreResult<Vec<Job>>;
}

/// Index of cached artifacts, keyed by cache key.
#[async_trait]
pub trait AssetIndex: Send + Sync {
    async fn get(&self, cache_key: &str) -> FirestoreResult<Option<ProcessedAsset>>;

    /// Insert or replace the entry for `asset.cache_key`.
    async fn upsert(&self, asset: &ProcessedAsset) -> FirestoreResult<()>;

    /// Remove an entry. Removing a missing entry succeeds.
    async fn delete(&self, cache_key: &str) -> FirestoreResult<()>;
}

/// Read access to listing records.
#[async_trait]
pub trait ListingLookup: Send + Sync {
    async fn coordinates(&self, listing_id: &str) -> FirestoreResult<Option<Coordinates>>;
}
