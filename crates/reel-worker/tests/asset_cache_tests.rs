//! Asset cache behaviour over in-memory storage.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use common::{MemoryAssetIndex, MemoryObjectStore};
use reel_models::AssetType;
use reel_worker::{AssetCache, CacheConfig, RetryPolicy};

struct Fixture {
    cache: AssetCache,
    index: Arc<MemoryAssetIndex>,
    store: Arc<MemoryObjectStore>,
    dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let index = Arc::new(MemoryAssetIndex::default());
    let store = Arc::new(MemoryObjectStore::default());
    let retry = RetryPolicy::new("test")
        .with_max_attempts(1)
        .with_base_delay(Duration::from_millis(1));
    let cache = AssetCache::new(store.clone(), index.clone(), CacheConfig::default(), retry);
    Fixture {
        cache,
        index,
        store,
        dir: tempfile::tempdir().unwrap(),
    }
}

impl Fixture {
    fn clip(&self, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn age_entry(&self, key: &str, hours: i64, access_count: u32) {
        let mut entry = self.index.entry(key).unwrap();
        entry.created_at = Utc::now() - chrono::Duration::hours(hours);
        entry.metadata.access_count = access_count;
        self.index.insert(entry);
    }
}

#[tokio::test]
async fn test_put_then_get_hits() {
    let f = fixture();
    let path = f.clip("a.mp4", b"clip-a");

    let stored = f
        .cache
        .put("key-a", &path, AssetType::PhotoClip, vec!["listing-1".into()])
        .await
        .unwrap();
    assert_eq!(f.store.object(&stored.path).as_deref(), Some(&b"clip-a"[..]));
    assert_eq!(stored.hash.len(), 64);

    let hit = f.cache.get("key-a").await.unwrap().unwrap();
    assert_eq!(hit.path, stored.path);
    assert_eq!(hit.metadata.access_count, 1);
    assert_eq!(f.index.entry("key-a").unwrap().metadata.access_count, 1);
}

#[tokio::test]
async fn test_miss_on_unknown_key() {
    let f = fixture();
    assert!(f.cache.get("nothing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_entry_is_invalidated() {
    let f = fixture();
    let path = f.clip("a.mp4", b"clip-a");
    f.cache
        .put("key-a", &path, AssetType::PhotoClip, vec![])
        .await
        .unwrap();
    f.age_entry("key-a", 25, 0);

    assert!(f.cache.get("key-a").await.unwrap().is_none());
    assert!(f.index.entry("key-a").is_none());
}

#[tokio::test]
async fn test_frequent_entry_uses_long_window() {
    let f = fixture();
    let path = f.clip("a.mp4", b"clip-a");
    f.cache
        .put("key-a", &path, AssetType::PhotoClip, vec![])
        .await
        .unwrap();

    // Past the short window but accessed often enough for the long one.
    f.age_entry("key-a", 48, 6);
    assert!(f.cache.get("key-a").await.unwrap().is_some());

    // Exactly at the threshold is still the short window.
    f.age_entry("key-a", 48, 5);
    assert!(f.cache.get("key-a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_object_invalidates_entry() {
    let f = fixture();
    let path = f.clip("a.mp4", b"clip-a");
    let stored = f
        .cache
        .put("key-a", &path, AssetType::PhotoClip, vec![])
        .await
        .unwrap();
    f.store.remove(&stored.path);

    assert!(f.cache.get("key-a").await.unwrap().is_none());
    assert!(f.index.entry("key-a").is_none());
}

#[tokio::test]
async fn test_reput_preserves_access_history() {
    let f = fixture();
    let path = f.clip("a.mp4", b"clip-a");
    let first = f
        .cache
        .put("key-a", &path, AssetType::PhotoClip, vec![])
        .await
        .unwrap();
    f.cache.get("key-a").await.unwrap();
    f.cache.get("key-a").await.unwrap();

    let replacement = f.clip("b.mp4", b"clip-b");
    let second = f
        .cache
        .put("key-a", &replacement, AssetType::PhotoClip, vec![])
        .await
        .unwrap();

    assert_eq!(second.metadata.access_count, 2);
    assert_eq!(second.created_at, first.created_at);
    assert_ne!(second.hash, first.hash);
}

#[tokio::test]
async fn test_get_or_produce_runs_producer_once() {
    let f = fixture();
    let path = f.clip("a.mp4", b"clip-a");
    let calls = AtomicUsize::new(0);

    for _ in 0..2 {
        let outcome = f
            .cache
            .get_or_produce("key-a", AssetType::FlyoverClip, vec![], || {
                calls.fetch_add(1, Ordering::SeqCst);
                let path = path.clone();
                async move { Ok(path) }
            })
            .await
            .unwrap();
        assert_eq!(outcome.asset.asset_type, AssetType::FlyoverClip);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.index.len(), 1);
}

#[tokio::test]
async fn test_put_location_records_existing_object() {
    let f = fixture();
    f.store.insert("listings/l/jobs/j/wave.mp4", b"video");

    f.cache
        .put_location(
            "tpl",
            "listings/l/jobs/j/wave.mp4",
            AssetType::ComposedTemplate,
            "abc",
            vec!["wave".into()],
        )
        .await
        .unwrap();

    let hit = f.cache.get("tpl").await.unwrap().unwrap();
    assert_eq!(hit.path, "listings/l/jobs/j/wave.mp4");
    assert_eq!(hit.metadata.tags, vec!["wave".to_string()]);
    // Nothing was uploaded under the cache prefix.
    assert_eq!(f.store.keys(), vec!["listings/l/jobs/j/wave.mp4".to_string()]);
}
