//! In-memory collaborators for pipeline tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use reel_firestore::{AssetIndex, FirestoreError, FirestoreResult, JobStore, ListingLookup};
use reel_models::{
    Coordinates, Job, JobId, JobMetadata, JobStatus, JobUpdate, NewJob, ProcessedAsset,
    TemplateDefinition, TemplateRegistry,
};
use reel_storage::{ObjectStore, StorageError, StorageResult};
use reel_synthesis::{
    GenerationInput, GenerationRequest, GenerationService, SynthesisResult, TaskHandle, TaskStatus,
};
use reel_worker::{
    AssetCache, CacheConfig, ClipGenerator, FlyoverGenerator, Orchestrator, PipelineConfig,
    PipelineDeps, PipelineError, PipelineResult, PollSettings, RetryPolicy, TemplateComposer,
};

// ============================================================================
// Job store
// ============================================================================

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
    progress_writes: Mutex<Vec<u8>>,
}

impl MemoryJobStore {
    pub fn insert(&self, job: Job) {
        self.jobs.lock().unwrap().insert(job.id.clone(), job);
    }

    pub fn job(&self, id: &JobId) -> Job {
        self.jobs.lock().unwrap().get(id).cloned().expect("job exists")
    }

    /// Every progress value written, in order.
    pub fn progress_writes(&self) -> Vec<u8> {
        self.progress_writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, new_job: NewJob) -> FirestoreResult<Job> {
        let job = Job::from_new(new_job);
        self.insert(job.clone());
        Ok(job)
    }

    async fn get(&self, id: &JobId) -> FirestoreResult<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(id).cloned())
    }

    async fn update(&self, id: &JobId, update: JobUpdate) -> FirestoreResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| FirestoreError::not_found(format!("jobs/{}", id)))?;
        if let Some(p) = update.progress {
            self.progress_writes.lock().unwrap().push(p);
        }
        job.apply(&update);
        Ok(())
    }

    async fn list_by_status_since(
        &self,
        status: JobStatus,
        since: DateTime<Utc>,
        limit: usize,
    ) -> FirestoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.status == status && j.created_at >= since)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn list_processing_by_listing(&self, listing_id: &str) -> FirestoreResult<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.status == JobStatus::Processing && j.listing_id == listing_id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Asset index and object store
// ============================================================================

#[derive(Default)]
pub struct MemoryAssetIndex {
    entries: Mutex<HashMap<String, ProcessedAsset>>,
}

impl MemoryAssetIndex {
    pub fn entry(&self, key: &str) -> Option<ProcessedAsset> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn insert(&self, asset: ProcessedAsset) {
        self.entries
            .lock()
            .unwrap()
            .insert(asset.cache_key.clone(), asset);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl AssetIndex for MemoryAssetIndex {
    async fn get(&self, cache_key: &str) -> FirestoreResult<Option<ProcessedAsset>> {
        Ok(self.entry(cache_key))
    }

    async fn upsert(&self, asset: &ProcessedAsset) -> FirestoreResult<()> {
        self.insert(asset.clone());
        Ok(())
    }

    async fn delete(&self, cache_key: &str) -> FirestoreResult<()> {
        self.entries.lock().unwrap().remove(cache_key);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.object(key).ok_or_else(|| StorageError::not_found(key))
    }

    async fn put(&self, data: Vec<u8>, key: &str, _content_type: &str) -> StorageResult<String> {
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(key.to_string())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.remove(key);
        Ok(())
    }
}

#[derive(Default)]
pub struct StaticListings {
    pub coordinates: HashMap<String, Coordinates>,
}

#[async_trait]
impl ListingLookup for StaticListings {
    async fn coordinates(&self, listing_id: &str) -> FirestoreResult<Option<Coordinates>> {
        Ok(self.coordinates.get(listing_id).copied())
    }
}

// ============================================================================
// Generation service and composer
// ============================================================================

/// Images whose bytes contain `fail` are rejected by the service.
#[derive(Default)]
pub struct FakeGenerationService {
    submits: AtomicUsize,
    tasks: Mutex<HashMap<String, Result<Vec<u8>, String>>>,
}

impl FakeGenerationService {
    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for FakeGenerationService {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn submit(&self, request: &GenerationRequest) -> SynthesisResult<TaskHandle> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        let id = format!("task-{}", n);
        let outcome = match &request.input {
            GenerationInput::Image { data, .. } => {
                if data.windows(4).any(|w| w == b"fail") {
                    Err("content rejected".to_string())
                } else {
                    let mut clip = b"clip:".to_vec();
                    clip.extend_from_slice(data);
                    clip.extend_from_slice(format!(":{}", n).as_bytes());
                    Ok(clip)
                }
            }
            GenerationInput::Location(c) => Ok(format!("flyover:{}", c.canonical()).into_bytes()),
        };
        self.tasks.lock().unwrap().insert(id.clone(), outcome);
        Ok(TaskHandle(id))
    }

    async fn poll(&self, handle: &TaskHandle) -> SynthesisResult<TaskStatus> {
        let tasks = self.tasks.lock().unwrap();
        Ok(match tasks.get(handle.as_str()) {
            Some(Ok(_)) => TaskStatus::succeeded(format!("mem://{}", handle)),
            Some(Err(reason)) => TaskStatus::failed(reason.clone()),
            None => TaskStatus::pending(),
        })
    }

    async fn download(&self, url: &str) -> SynthesisResult<Vec<u8>> {
        let id = url.trim_start_matches("mem://");
        let tasks = self.tasks.lock().unwrap();
        Ok(tasks
            .get(id)
            .and_then(|r| r.as_ref().ok())
            .cloned()
            .unwrap_or_default())
    }
}

/// Writes the concatenated segment bytes; fails for selected templates.
#[derive(Default)]
pub struct FakeComposer {
    pub failing: HashSet<String>,
    calls: AtomicUsize,
}

impl FakeComposer {
    pub fn failing(templates: &[&str]) -> Self {
        Self {
            failing: templates.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TemplateComposer for FakeComposer {
    async fn compose(
        &self,
        template: &TemplateDefinition,
        segments: &[(PathBuf, f64)],
        output: &Path,
    ) -> PipelineResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&template.name) {
            return Err(PipelineError::composition_failed(&template.name, "encoder crashed"));
        }
        let mut data = format!("{}:", template.name).into_bytes();
        for (path, _) in segments {
            data.extend(tokio::fs::read(path).await?);
            data.push(b'|');
        }
        tokio::fs::write(output, data).await?;
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub jobs: Arc<MemoryJobStore>,
    pub assets: Arc<MemoryAssetIndex>,
    pub store: Arc<MemoryObjectStore>,
    pub synthesis: Arc<FakeGenerationService>,
    pub flyover: Arc<FakeGenerationService>,
    pub composer: Arc<FakeComposer>,
    pub orchestrator: Orchestrator,
    pub work_dir: tempfile::TempDir,
}

pub struct HarnessBuilder {
    composer: FakeComposer,
    listings: StaticListings,
    registry: TemplateRegistry,
    with_flyover: bool,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            composer: FakeComposer::default(),
            listings: StaticListings::default(),
            registry: TemplateRegistry::builtin(),
            with_flyover: true,
        }
    }
}

impl HarnessBuilder {
    pub fn failing_templates(mut self, templates: &[&str]) -> Self {
        self.composer = FakeComposer::failing(templates);
        self
    }

    pub fn listing_coordinates(mut self, listing_id: &str, coordinates: Coordinates) -> Self {
        self.listings
            .coordinates
            .insert(listing_id.to_string(), coordinates);
        self
    }

    pub fn without_flyover_service(mut self) -> Self {
        self.with_flyover = false;
        self
    }

    pub fn build(self) -> Harness {
        let jobs = Arc::new(MemoryJobStore::default());
        let assets = Arc::new(MemoryAssetIndex::default());
        let store = Arc::new(MemoryObjectStore::default());
        let synthesis = Arc::new(FakeGenerationService::default());
        let flyover = Arc::new(FakeGenerationService::default());
        let composer = Arc::new(self.composer);
        let work_dir = tempfile::tempdir().unwrap();

        let retry = RetryPolicy::new("test")
            .with_max_attempts(2)
            .with_base_delay(Duration::from_millis(1));
        let poll = PollSettings {
            interval: Duration::from_millis(1),
            max_attempts: 5,
        };

        let config = PipelineConfig {
            work_dir: work_dir.path().to_path_buf(),
            retry_base_delay: Duration::from_millis(1),
            poll_interval: Duration::from_millis(1),
            max_poll_attempts: 5,
            ..PipelineConfig::default()
        };

        let flyover_generator = self.with_flyover.then(|| {
            Arc::new(FlyoverGenerator::new(
                flyover.clone(),
                retry.clone(),
                poll,
                6.0,
            ))
        });

        let deps = PipelineDeps {
            jobs: jobs.clone(),
            listings: Arc::new(self.listings),
            store: store.clone(),
            clip_generator: Arc::new(ClipGenerator::new(
                synthesis.clone(),
                store.clone(),
                retry.clone(),
                poll,
                5.0,
            )),
            flyover_generator,
            composer: composer.clone(),
            registry: Arc::new(self.registry),
        };
        let cache = AssetCache::new(store.clone(), assets.clone(), CacheConfig::default(), retry);

        Harness {
            jobs,
            assets,
            store,
            synthesis,
            flyover,
            composer,
            orchestrator: Orchestrator::new(deps, cache, config),
            work_dir,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Upload `photos` and create a PENDING job over them.
    pub fn create_job(&self, template: &str, templates: &[&str], photos: &[&[u8]]) -> Job {
        let keys: Vec<String> = photos
            .iter()
            .enumerate()
            .map(|(i, data)| {
                let key = format!("uploads/listing-1/{}.jpg", i);
                self.store.insert(&key, data);
                key
            })
            .collect();

        let metadata = JobMetadata {
            templates: templates.iter().map(|s| s.to_string()).collect(),
            ..JobMetadata::default()
        };
        let job = Job::from_new(NewJob::new("listing-1", "user-1", template, keys).with_metadata(metadata));
        self.jobs.insert(job.clone());
        job
    }

    /// Files left under the scratch root.
    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.work_dir.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

/// Five distinct photos.
pub fn five_photos() -> Vec<&'static [u8]> {
    vec![b"photo-a", b"photo-b", b"photo-c", b"photo-d", b"photo-e"]
}
