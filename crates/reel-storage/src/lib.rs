//! Durable object storage for the listing reel pipeline.
//!
//! This crate provides:
//! - The `ObjectStore` trait the pipeline reads and writes through
//! - A Cloudflare R2 implementation (S3 API)
//! - Object key layout for cached artifacts and finished videos

pub mod client;
pub mod error;
pub mod keys;
pub mod store;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use keys::{cache_object_key, template_output_key, validate_key, VIDEO_CONTENT_TYPE};
pub use store::ObjectStore;
