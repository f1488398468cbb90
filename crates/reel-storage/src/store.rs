//! The object store seam used by the pipeline.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Durable blob storage addressed by key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object's bytes. Missing objects yield `StorageError::NotFound`.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Store bytes under `key` and return the durable location.
    async fn put(&self, data: Vec<u8>, key: &str, content_type: &str) -> StorageResult<String>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Download an object into a local file, creating parent directories.
    async fn download_to(&self, key: &str, path: &Path) -> StorageResult<()> {
        let bytes = self.get(key).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::download_failed(format!("Failed to create directory: {}", e))
            })?;
        }

        tokio::fs::write(path, &bytes).await.map_err(|e| {
            StorageError::download_failed(format!("Failed to write file: {}", e))
        })?;

        debug!(key = %key, path = %path.display(), bytes = bytes.len(), "Downloaded object");
        Ok(())
    }

    /// Upload a local file and return the durable location.
    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<String> {
        let data = tokio::fs::read(path).await.map_err(|e| {
            StorageError::upload_failed(format!("Failed to read {}: {}", path.display(), e))
        })?;
        self.put(data, key, content_type).await
    }
}
