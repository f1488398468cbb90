//! Transient file tracking.
//!
//! Every local file or scratch directory a job creates is registered here and
//! removed in the cleanup phase, whether the job succeeded or not.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resource {
    File(PathBuf),
    Dir(PathBuf),
}

impl Resource {
    fn path(&self) -> &Path {
        match self {
            Resource::File(p) | Resource::Dir(p) => p,
        }
    }
}

/// Registry of transient paths owned by one job execution.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    resources: Mutex<Vec<Resource>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, resource: Resource) {
        // A poisoned lock still holds a usable list.
        let mut resources = self.resources.lock().unwrap_or_else(|e| e.into_inner());
        if !resources.contains(&resource) {
            resources.push(resource);
        }
    }

    pub fn track(&self, path: impl Into<PathBuf>) {
        self.register(Resource::File(path.into()));
    }

    /// Register a directory; it is removed recursively.
    pub fn track_dir(&self, path: impl Into<PathBuf>) {
        self.register(Resource::Dir(path.into()));
    }

    pub fn tracked(&self) -> Vec<PathBuf> {
        self.resources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| r.path().to_path_buf())
            .collect()
    }

    /// Remove every registered path. Never fails; returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let resources: Vec<Resource> = {
            let mut guard = self.resources.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };

        let mut removed = 0;
        // Files first, then directories, so nested files are not reported twice.
        let (files, dirs): (Vec<_>, Vec<_>) = resources
            .into_iter()
            .partition(|r| matches!(r, Resource::File(_)));

        for resource in files.into_iter().chain(dirs) {
            let result = match &resource {
                Resource::File(p) => tokio::fs::remove_file(p).await,
                Resource::Dir(p) => tokio::fs::remove_dir_all(p).await,
            };

            match result {
                Ok(()) => {
                    removed += 1;
                    debug!(path = %resource.path().display(), "Removed transient resource");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        path = %resource.path().display(),
                        "Failed to remove transient resource: {}",
                        e
                    );
                }
            }
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cleanup_removes_files_and_dirs() {
        let root = tempfile::tempdir().unwrap();
        let scratch = root.path().join("job-1");
        std::fs::create_dir_all(&scratch).unwrap();
        let clip = scratch.join("clip_0.mp4");
        std::fs::write(&clip, b"x").unwrap();
        let loose = root.path().join("loose.mp4");
        std::fs::write(&loose, b"y").unwrap();

        let tracker = ResourceTracker::new();
        tracker.track(&clip);
        tracker.track(&loose);
        tracker.track_dir(&scratch);

        assert_eq!(tracker.cleanup().await, 3);
        assert!(!scratch.exists());
        assert!(!loose.exists());
        assert!(tracker.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_missing_paths() {
        let tracker = ResourceTracker::new();
        tracker.track("/nonexistent/reel/file.mp4");
        tracker.track_dir("/nonexistent/reel/dir");
        assert_eq!(tracker.cleanup().await, 0);
    }

    #[test]
    fn test_duplicate_registration_is_ignored() {
        let tracker = ResourceTracker::new();
        tracker.track("/tmp/a.mp4");
        tracker.track("/tmp/a.mp4");
        assert_eq!(tracker.tracked().len(), 1);
    }
}
