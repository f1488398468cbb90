//! Per-photo clip stage and the flyover clip.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use tracing::debug;

use reel_models::{AssetType, ClipFailure, ClipRecord, Coordinates, JobMetadata};

use super::{JobRun, Orchestrator, PROGRESS_CLIPS_DONE, PROGRESS_STARTED};
use crate::asset_cache::{derive_key, CacheKeyInput, CacheOutcome};
use crate::error::{PipelineError, PipelineResult};
use crate::progress::stage_progress;

/// A clip available on local disk for composition.
#[derive(Debug, Clone)]
pub(crate) struct LocalClip {
    pub record: ClipRecord,
    pub path: PathBuf,
}

/// Result of the photo clip stage, ordered by photo index.
#[derive(Debug, Default)]
pub(crate) struct ClipStage {
    pub clips: Vec<LocalClip>,
    pub failures: Vec<ClipFailure>,
}

impl ClipStage {
    pub fn records(&self) -> Vec<ClipRecord> {
        self.clips.iter().map(|c| c.record.clone()).collect()
    }
}

/// Flyover clip on local disk with its cache key.
#[derive(Debug, Clone)]
pub(crate) struct LocalFlyover {
    pub path: PathBuf,
    pub cache_key: String,
}

pub fn photo_clip_cache_key(image_key: &str, duration_secs: f64) -> String {
    derive_key(
        &CacheKeyInput::new(AssetType::PhotoClip)
            .input(image_key)
            .param("duration", format!("{:.3}", duration_secs)),
    )
}

pub fn flyover_cache_key(coordinates: &Coordinates, duration_secs: f64) -> String {
    derive_key(
        &CacheKeyInput::new(AssetType::FlyoverClip)
            .input(coordinates.canonical())
            .param("duration", format!("{:.3}", duration_secs)),
    )
}

/// Generate or reuse a clip for every photo, `synthesis_batch_size` at a time.
pub(crate) async fn generate_clips(
    ctx: &Orchestrator,
    run: &JobRun<'_>,
    metadata: &JobMetadata,
    force: &BTreeSet<usize>,
) -> ClipStage {
    let total = run.job.input_files.len();
    let indices: Vec<usize> = (0..total).collect();
    let mut stage = ClipStage::default();
    let mut done = 0;

    for batch in indices.chunks(ctx.config.synthesis_batch_size.max(1)) {
        let results = join_all(batch.iter().map(|&index| {
            let previous = metadata.clip_for(index).cloned();
            let regenerate = force.contains(&index);
            async move {
                let result = produce_clip(ctx, run, index, previous, regenerate).await;
                (index, result)
            }
        }))
        .await;

        for (index, result) in results {
            match result {
                Ok(clip) => stage.clips.push(clip),
                Err(e) => {
                    let source = &run.job.input_files[index];
                    let reason = e.to_string();
                    run.logger.log_clip_failure(index, source, &reason);
                    stage.failures.push(ClipFailure {
                        index,
                        source: source.clone(),
                        reason,
                    });
                }
            }
            done += 1;
            run.progress
                .advance(stage_progress(PROGRESS_STARTED, PROGRESS_CLIPS_DONE, done, total))
                .await;
        }
    }

    stage.clips.sort_by_key(|c| c.record.index);
    stage.failures.sort_by_key(|f| f.index);
    debug!(
        job_id = %run.job.id,
        clips = stage.clips.len(),
        failures = stage.failures.len(),
        "Clip stage finished"
    );
    stage
}

/// One photo: previous run's clip, then the cache, then synthesis.
async fn produce_clip(
    ctx: &Orchestrator,
    run: &JobRun<'_>,
    index: usize,
    previous: Option<ClipRecord>,
    regenerate: bool,
) -> PipelineResult<LocalClip> {
    let source = &run.job.input_files[index];
    let duration = ctx.deps.clip_generator.clip_duration_secs();
    let cache_key = photo_clip_cache_key(source, duration);
    let local = run.work_dir.join(format!("clip_{}.mp4", index));

    if !regenerate {
        if let Some(record) = previous.filter(|r| &r.source == source) {
            if object_exists(ctx, &record.location).await? {
                fetch(ctx, run, &record.location, &local).await?;
                return Ok(LocalClip {
                    record: ClipRecord {
                        from_cache: true,
                        ..record
                    },
                    path: local,
                });
            }
        }
    }

    let tags = vec![run.job.listing_id.clone()];
    let synthesize = || {
        ctx.deps
            .clip_generator
            .generate(source, index, &run.work_dir, &run.tracker)
    };
    let (asset, path, from_cache) = if regenerate {
        let path = synthesize().await?;
        let asset = ctx
            .cache
            .put(&cache_key, &path, AssetType::PhotoClip, tags)
            .await?;
        (asset, path, false)
    } else {
        let outcome = ctx
            .cache
            .get_or_produce(&cache_key, AssetType::PhotoClip, tags, synthesize)
            .await?;
        let path = materialize(ctx, run, &outcome, &local).await?;
        (outcome.asset, path, outcome.from_cache)
    };

    Ok(LocalClip {
        record: ClipRecord {
            index,
            source: source.clone(),
            location: asset.path,
            cache_key,
            from_cache,
        },
        path,
    })
}

/// Flyover: the job's previous flyover, then the cache, then generation.
pub(crate) async fn produce_flyover(
    ctx: &Orchestrator,
    run: &JobRun<'_>,
    coordinates: Coordinates,
    metadata: &mut JobMetadata,
) -> PipelineResult<LocalFlyover> {
    let generator = ctx
        .deps
        .flyover_generator
        .as_ref()
        .ok_or_else(|| PipelineError::FlyoverFailed("no flyover service configured".into()))?;

    let cache_key = flyover_cache_key(&coordinates, generator.clip_duration_secs());
    let local = run.work_dir.join("flyover.mp4");

    if let Some(location) = metadata.map_video.clone() {
        if object_exists(ctx, &location).await? {
            fetch(ctx, run, &location, &local).await?;
            return Ok(LocalFlyover {
                path: local,
                cache_key,
            });
        }
    }

    let outcome = ctx
        .cache
        .get_or_produce(
            &cache_key,
            AssetType::FlyoverClip,
            vec![run.job.listing_id.clone()],
            || generator.generate(coordinates, &run.work_dir, &run.tracker),
        )
        .await?;
    let path = materialize(ctx, run, &outcome, &local).await?;
    metadata.map_video = Some(outcome.asset.path);

    Ok(LocalFlyover { path, cache_key })
}

/// Local copy of a cache outcome: the produced file, or a download of the
/// cached object into `local`.
async fn materialize(
    ctx: &Orchestrator,
    run: &JobRun<'_>,
    outcome: &CacheOutcome,
    local: &Path,
) -> PipelineResult<PathBuf> {
    match &outcome.local_path {
        Some(path) => Ok(path.clone()),
        None => {
            fetch(ctx, run, &outcome.asset.path, local).await?;
            Ok(local.to_path_buf())
        }
    }
}

async fn object_exists(ctx: &Orchestrator, key: &str) -> PipelineResult<bool> {
    Ok(ctx
        .retry
        .named("object_exists")
        .run_if(|e: &reel_storage::StorageError| e.is_retryable(), || {
            ctx.deps.store.exists(key)
        })
        .await?)
}

async fn fetch(ctx: &Orchestrator, run: &JobRun<'_>, key: &str, local: &Path) -> PipelineResult<()> {
    run.tracker.track(local);
    ctx.retry
        .named("object_download")
        .run_if(|e: &reel_storage::StorageError| e.is_retryable(), || {
            ctx.deps.store.download_to(key, local)
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_photo_clip_key_depends_on_duration() {
        assert_eq!(
            photo_clip_cache_key("photos/a.jpg", 5.0),
            photo_clip_cache_key("photos/a.jpg", 5.0004)
        );
        assert_ne!(
            photo_clip_cache_key("photos/a.jpg", 5.0),
            photo_clip_cache_key("photos/a.jpg", 6.0)
        );
    }

    #[test]
    fn test_flyover_key_uses_rounded_coordinates() {
        let a = Coordinates::new(40.7128001, -74.0060001).unwrap();
        let b = Coordinates::new(40.7128004, -74.0060004).unwrap();
        assert_eq!(flyover_cache_key(&a, 6.0), flyover_cache_key(&b, 6.0));
    }
}
