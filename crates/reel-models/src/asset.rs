//! Processed asset index entries (artifact cache records).

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of cached artifact. Part of the cache key and the storage path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    /// Motion clip synthesized from one photo
    PhotoClip,
    /// Geographic flyover clip
    FlyoverClip,
    /// Finished template video
    ComposedTemplate,
}

impl AssetType {
    pub const ALL: &'static [AssetType] = &[
        AssetType::PhotoClip,
        AssetType::FlyoverClip,
        AssetType::ComposedTemplate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::PhotoClip => "photo_clip",
            AssetType::FlyoverClip => "flyover_clip",
            AssetType::ComposedTemplate => "composed_template",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo_clip" => Ok(AssetType::PhotoClip),
            "flyover_clip" => Ok(AssetType::FlyoverClip),
            "composed_template" => Ok(AssetType::ComposedTemplate),
            other => Err(format!("unknown asset type: {}", other)),
        }
    }
}

/// Access bookkeeping for a cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssetMetadata {
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u32,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A cached artifact record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessedAsset {
    /// SHA-256 hex over the producing inputs
    pub cache_key: String,
    pub asset_type: AssetType,
    /// Durable object key of the artifact
    pub path: String,
    /// SHA-256 hex of the artifact bytes
    pub hash: String,
    pub metadata: AssetMetadata,
    pub created_at: DateTime<Utc>,
}

impl ProcessedAsset {
    pub fn new(
        cache_key: impl Into<String>,
        asset_type: AssetType,
        path: impl Into<String>,
        hash: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            cache_key: cache_key.into(),
            asset_type,
            path: path.into(),
            hash: hash.into(),
            metadata: AssetMetadata {
                created_at: now,
                last_accessed: now,
                access_count: 0,
                tags,
            },
            created_at: now,
        }
    }

    /// Validity window for this entry.
    ///
    /// Entries accessed more than `frequent_threshold` times get the long window.
    pub fn ttl(&self, short: Duration, long: Duration, frequent_threshold: u32) -> Duration {
        if self.metadata.access_count > frequent_threshold {
            long
        } else {
            short
        }
    }

    pub fn is_expired(
        &self,
        now: DateTime<Utc>,
        short: Duration,
        long: Duration,
        frequent_threshold: u32,
    ) -> bool {
        now - self.created_at > self.ttl(short, long, frequent_threshold)
    }

    /// Record a cache hit.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.metadata.access_count = self.metadata.access_count.saturating_add(1);
        self.metadata.last_accessed = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset_aged(hours: i64, access_count: u32) -> ProcessedAsset {
        let mut asset = ProcessedAsset::new("k", AssetType::PhotoClip, "cache/photo_clip/k.mp4", "h", vec![]);
        asset.created_at = Utc::now() - Duration::hours(hours);
        asset.metadata.access_count = access_count;
        asset
    }

    #[test]
    fn test_short_tier_expiry() {
        let short = Duration::hours(24);
        let long = Duration::days(7);
        assert!(!asset_aged(23, 0).is_expired(Utc::now(), short, long, 5));
        assert!(asset_aged(25, 0).is_expired(Utc::now(), short, long, 5));
    }

    #[test]
    fn test_frequent_entries_use_long_tier() {
        let short = Duration::hours(24);
        let long = Duration::days(7);
        // Threshold is exclusive: 5 accesses is still the short tier.
        assert!(asset_aged(48, 5).is_expired(Utc::now(), short, long, 5));
        assert!(!asset_aged(48, 6).is_expired(Utc::now(), short, long, 5));
        assert!(asset_aged(24 * 8, 6).is_expired(Utc::now(), short, long, 5));
    }

    #[test]
    fn test_touch_bumps_counters() {
        let mut asset = asset_aged(1, 0);
        let now = Utc::now();
        asset.touch(now);
        assert_eq!(asset.metadata.access_count, 1);
        assert_eq!(asset.metadata.last_accessed, now);
    }

    #[test]
    fn test_asset_type_strings() {
        for t in AssetType::ALL {
            assert_eq!(t.as_str().parse::<AssetType>().unwrap(), *t);
        }
    }
}
