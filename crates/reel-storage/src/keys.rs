//! Object key layout.
//!
//! - Cached artifacts: `cache/{asset_type}/{cache_key}.mp4`
//! - Finished videos: `{prefix}/{listing_id}/jobs/{job_id}/{template}.mp4`

use reel_models::AssetType;

use crate::error::{StorageError, StorageResult};

pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Default prefix for finished template videos.
pub const DEFAULT_OUTPUT_PREFIX: &str = "listings";

pub fn cache_object_key(asset_type: AssetType, cache_key: &str) -> String {
    format!("cache/{}/{}.mp4", asset_type.as_str(), cache_key)
}

pub fn template_output_key(prefix: &str, listing_id: &str, job_id: &str, template: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}/jobs/{}/{}.mp4", listing_id, job_id, template)
    } else {
        format!("{}/{}/jobs/{}/{}.mp4", prefix, listing_id, job_id, template)
    }
}

/// Reject keys that are empty, absolute, or escape their prefix.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.trim().is_empty()
        || key.starts_with('/')
        || key.split('/').any(|segment| segment == "..")
    {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_layout() {
        assert_eq!(
            cache_object_key(AssetType::FlyoverClip, "abc123"),
            "cache/flyover_clip/abc123.mp4"
        );
    }

    #[test]
    fn test_output_key_layout() {
        assert_eq!(
            template_output_key("listings", "l1", "j1", "wave"),
            "listings/l1/jobs/j1/wave.mp4"
        );
        assert_eq!(
            template_output_key("/listings/", "l1", "j1", "wave"),
            "listings/l1/jobs/j1/wave.mp4"
        );
        assert_eq!(template_output_key("", "l1", "j1", "wave"), "l1/jobs/j1/wave.mp4");
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("photos/a.jpg").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("photos/../secret").is_err());
    }
}
