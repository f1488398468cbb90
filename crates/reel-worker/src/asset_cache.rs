//! Artifact cache.
//!
//! Maps a deterministic key, derived from everything that determines a stage's
//! output, to an artifact already in the object store. Entries live in the
//! asset index and expire on one of two tiers: frequently hit entries get the
//! long window. An entry whose backing object is gone is treated as expired.
//!
//! Writers to the same key race harmlessly; the last upsert wins.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use reel_firestore::AssetIndex;
use reel_models::{AssetType, ProcessedAsset};
use reel_storage::{cache_object_key, ObjectStore, VIDEO_CONTENT_TYPE};

use crate::config::CacheConfig;
use crate::error::PipelineResult;
use crate::retry::RetryPolicy;

/// Everything that determines an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyInput {
    pub kind: AssetType,
    /// Ordered input identities (image keys, coordinates, clip keys)
    pub inputs: Vec<String>,
    /// Stage parameters; ordering is canonical
    pub params: BTreeMap<String, String>,
}

impl CacheKeyInput {
    pub fn new(kind: AssetType) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }
}

fn write_field(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_be_bytes());
    hasher.update(field.as_bytes());
}

/// SHA-256 over a length-prefixed encoding, hex encoded.
///
/// Length prefixes keep `["ab", "c"]` and `["a", "bc"]` apart.
pub fn derive_key(input: &CacheKeyInput) -> String {
    let mut hasher = Sha256::new();
    write_field(&mut hasher, input.kind.as_str());

    hasher.update((input.inputs.len() as u64).to_be_bytes());
    for value in &input.inputs {
        write_field(&mut hasher, value);
    }

    hasher.update((input.params.len() as u64).to_be_bytes());
    for (name, value) in &input.params {
        write_field(&mut hasher, name);
        write_field(&mut hasher, value);
    }

    format!("{:x}", hasher.finalize())
}

/// SHA-256 of a file's contents.
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let data = tokio::fs::read(path).await?;
    Ok(format!("{:x}", Sha256::digest(&data)))
}

/// Result of [`AssetCache::get_or_produce`].
#[derive(Debug, Clone)]
pub struct CacheOutcome {
    pub asset: ProcessedAsset,
    pub from_cache: bool,
    /// Set when the artifact was produced locally in this call
    pub local_path: Option<PathBuf>,
}

fn record_lookup(asset_type: AssetType, result: &'static str) {
    metrics::counter!(
        "pipeline_cache_lookups_total",
        "type" => asset_type.as_str(),
        "result" => result
    )
    .increment(1);
}

pub struct AssetCache {
    store: Arc<dyn ObjectStore>,
    index: Arc<dyn AssetIndex>,
    config: CacheConfig,
    retry: RetryPolicy,
}

impl AssetCache {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        index: Arc<dyn AssetIndex>,
        config: CacheConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            index,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn is_expired(&self, asset: &ProcessedAsset) -> bool {
        asset.is_expired(
            Utc::now(),
            self.config.short_ttl,
            self.config.long_ttl,
            self.config.frequent_threshold,
        )
    }

    async fn invalidate(&self, key: &str, reason: &str) {
        debug!(cache_key = %key, reason, "Invalidating cache entry");
        if let Err(e) = self.index.delete(key).await {
            warn!(cache_key = %key, "Failed to delete cache entry: {}", e);
        }
    }

    /// Look up a valid entry. Expired entries and entries whose object is
    /// missing are deleted and reported as a miss.
    pub async fn get(&self, key: &str) -> PipelineResult<Option<ProcessedAsset>> {
        let found = self
            .retry
            .named("cache_index_get")
            .run_if(|e: &reel_firestore::FirestoreError| e.is_retryable(), || self.index.get(key))
            .await?;

        let Some(mut asset) = found else {
            return Ok(None);
        };

        if self.is_expired(&asset) {
            record_lookup(asset.asset_type, "expired");
            self.invalidate(key, "expired").await;
            return Ok(None);
        }

        let exists = self
            .retry
            .named("cache_object_exists")
            .run_if(|e: &reel_storage::StorageError| e.is_retryable(), || {
                self.store.exists(&asset.path)
            })
            .await?;
        if !exists {
            record_lookup(asset.asset_type, "missing");
            self.invalidate(key, "backing object missing").await;
            return Ok(None);
        }

        record_lookup(asset.asset_type, "hit");
        asset.touch(Utc::now());
        // Access bookkeeping is best effort.
        if let Err(e) = self.index.upsert(&asset).await {
            warn!(cache_key = %key, "Failed to record cache hit: {}", e);
        }

        Ok(Some(asset))
    }

    /// Upload a local artifact under the cache layout and record it.
    pub async fn put(
        &self,
        key: &str,
        local_path: &Path,
        asset_type: AssetType,
        tags: Vec<String>,
    ) -> PipelineResult<ProcessedAsset> {
        let hash = hash_file(local_path).await?;
        let object_key = cache_object_key(asset_type, key);

        let location = self
            .retry
            .named("cache_upload")
            .run_if(|e: &reel_storage::StorageError| e.is_retryable(), || {
                self.store
                    .upload_file(local_path, &object_key, VIDEO_CONTENT_TYPE)
            })
            .await?;

        self.put_location(key, &location, asset_type, &hash, tags).await
    }

    /// Record an artifact that is already durable.
    ///
    /// A live existing entry keeps its access count and creation time.
    pub async fn put_location(
        &self,
        key: &str,
        location: &str,
        asset_type: AssetType,
        hash: &str,
        tags: Vec<String>,
    ) -> PipelineResult<ProcessedAsset> {
        let mut asset = ProcessedAsset::new(key, asset_type, location, hash, tags);

        match self.index.get(key).await {
            Ok(Some(existing)) if !self.is_expired(&existing) => {
                asset.metadata.access_count = existing.metadata.access_count;
                asset.metadata.created_at = existing.metadata.created_at;
                asset.created_at = existing.created_at;
            }
            Ok(_) => {}
            Err(e) => debug!(cache_key = %key, "Could not read existing entry: {}", e),
        }

        self.retry
            .named("cache_index_upsert")
            .run_if(|e: &reel_firestore::FirestoreError| e.is_retryable(), || {
                self.index.upsert(&asset)
            })
            .await?;

        info!(
            cache_key = %key,
            asset_type = asset_type.as_str(),
            path = %asset.path,
            "Cached artifact"
        );
        Ok(asset)
    }

    /// Return the cached artifact, or run `produce` and cache its output.
    pub async fn get_or_produce<F, Fut>(
        &self,
        key: &str,
        asset_type: AssetType,
        tags: Vec<String>,
        produce: F,
    ) -> PipelineResult<CacheOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PipelineResult<PathBuf>>,
    {
        if let Some(asset) = self.get(key).await? {
            return Ok(CacheOutcome {
                asset,
                from_cache: true,
                local_path: None,
            });
        }
        record_lookup(asset_type, "miss");

        let local = produce().await?;
        let asset = self.put(key, &local, asset_type, tags).await?;
        Ok(CacheOutcome {
            asset,
            from_cache: false,
            local_path: Some(local),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo_key(image: &str, duration: &str) -> String {
        derive_key(
            &CacheKeyInput::new(AssetType::PhotoClip)
                .input(image)
                .param("duration", duration),
        )
    }

    #[test]
    fn test_key_is_deterministic() {
        assert_eq!(photo_key("photos/a.jpg", "5"), photo_key("photos/a.jpg", "5"));
        assert_eq!(photo_key("photos/a.jpg", "5").len(), 64);
    }

    #[test]
    fn test_key_depends_on_every_part() {
        let base = photo_key("photos/a.jpg", "5");
        assert_ne!(base, photo_key("photos/b.jpg", "5"));
        assert_ne!(base, photo_key("photos/a.jpg", "6"));

        let flyover = derive_key(
            &CacheKeyInput::new(AssetType::FlyoverClip)
                .input("photos/a.jpg")
                .param("duration", "5"),
        );
        assert_ne!(base, flyover);
    }

    #[test]
    fn test_param_insertion_order_is_irrelevant() {
        let a = CacheKeyInput::new(AssetType::ComposedTemplate)
            .param("x", 1)
            .param("y", 2);
        let b = CacheKeyInput::new(AssetType::ComposedTemplate)
            .param("y", 2)
            .param("x", 1);
        assert_eq!(derive_key(&a), derive_key(&b));
    }

    #[test]
    fn test_inputs_are_length_prefixed() {
        let a = CacheKeyInput::new(AssetType::ComposedTemplate).input("ab").input("c");
        let b = CacheKeyInput::new(AssetType::ComposedTemplate).input("a").input("bc");
        assert_ne!(derive_key(&a), derive_key(&b));
    }

    #[tokio::test]
    async fn test_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            hash_file(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
