//! Firestore REST API client and the pipeline's durable records.
//!
//! This crate provides:
//! - A Firestore REST client with token caching, retry and metrics
//! - The `JobStore`, `AssetIndex` and `ListingLookup` traits
//! - Firestore-backed implementations of those traits

pub mod assets;
pub mod client;
pub mod error;
pub mod jobs;
pub mod listings;
pub mod metrics;
pub mod retry;
pub mod store;
pub mod token_cache;
pub mod types;


pub use assets::FirestoreAssetIndex;
pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use jobs::FirestoreJobStore;
pub use listings::FirestoreListingLookup;
pub use retry::RetryConfig;
pub use store::{AssetIndex, JobStore, ListingLookup};
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
