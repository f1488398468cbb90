//! Template composition and upload stage.

use std::path::{Path, PathBuf};
use std::time::Instant;

use futures::future::join_all;

use reel_models::{AssetType, TemplateDefinition, TemplateResult};
use reel_storage::{template_output_key, VIDEO_CONTENT_TYPE};

use super::clips::{LocalClip, LocalFlyover};
use super::{JobRun, Orchestrator, PROGRESS_FLYOVER_DONE, PROGRESS_TEMPLATES_DONE};
use crate::asset_cache::{derive_key, hash_file, CacheKeyInput};
use crate::error::{PipelineError, PipelineResult};
use crate::progress::stage_progress;

/// A source usable in a template slot.
#[derive(Debug, Clone)]
struct SlotSource {
    path: PathBuf,
    /// Content hash, so a regenerated clip invalidates compositions using it
    identity: String,
}

impl SlotSource {
    async fn new(path: &Path, fallback: &str) -> Self {
        let identity = hash_file(path)
            .await
            .unwrap_or_else(|_| fallback.to_string());
        Self {
            path: path.to_path_buf(),
            identity,
        }
    }
}

/// Key over the template name and the resolved slot sequence.
///
/// `slots` are `(clip identity, seconds)` in playback order.
pub fn template_cache_key(template: &str, slots: &[(String, f64)]) -> String {
    let durations = slots
        .iter()
        .map(|(_, d)| format!("{:.3}", d))
        .collect::<Vec<_>>()
        .join(",");

    let input = slots.iter().fold(
        CacheKeyInput::new(AssetType::ComposedTemplate).input(template),
        |input, (key, _)| input.input(key.as_str()),
    );
    derive_key(&input.param("durations", durations))
}

/// Compose every runnable template, `template_batch_size` at a time.
/// Never fails as a whole; each template yields a result.
pub(crate) async fn compose_templates(
    ctx: &Orchestrator,
    run: &JobRun<'_>,
    templates: &[TemplateDefinition],
    clips: &[LocalClip],
    flyover: Option<&LocalFlyover>,
) -> Vec<TemplateResult> {
    let photo_sources =
        join_all(clips.iter().map(|c| SlotSource::new(&c.path, &c.record.cache_key))).await;
    let flyover_source = match flyover {
        Some(f) => Some(SlotSource::new(&f.path, &f.cache_key).await),
        None => None,
    };

    let total = templates.len();
    let mut results = Vec::with_capacity(total);
    let mut done = 0;

    for batch in templates.chunks(ctx.config.template_batch_size.max(1)) {
        let batch_results = join_all(batch.iter().map(|template| {
            produce_template(ctx, run, template, &photo_sources, flyover_source.as_ref())
        }))
        .await;

        for result in batch_results {
            run.logger.log_template_result(&result);
            results.push(result);
            done += 1;
            run.progress
                .advance(stage_progress(PROGRESS_FLYOVER_DONE, PROGRESS_TEMPLATES_DONE, done, total))
                .await;
        }
    }

    results
}

async fn produce_template(
    ctx: &Orchestrator,
    run: &JobRun<'_>,
    template: &TemplateDefinition,
    photos: &[SlotSource],
    flyover: Option<&SlotSource>,
) -> TemplateResult {
    let started = Instant::now();
    let outcome = compose_and_upload(ctx, run, template, photos, flyover).await;
    let elapsed = started.elapsed();

    let status = if outcome.is_ok() { "success" } else { "failed" };
    metrics::histogram!(
        "pipeline_template_duration_seconds",
        "template" => template.name.clone(),
        "result" => status
    )
    .record(elapsed.as_secs_f64());

    let duration_ms = elapsed.as_millis() as u64;
    match outcome {
        Ok((location, from_cache)) => TemplateResult {
            from_cache,
            ..TemplateResult::completed(&template.name, location, duration_ms)
        },
        Err(PipelineError::TemplateCompositionFailed { reason, .. }) => {
            TemplateResult::failed(&template.name, reason, duration_ms)
        }
        Err(e) => TemplateResult::failed(&template.name, e.to_string(), duration_ms),
    }
}

/// Returns the durable output location and whether it came from the cache.
async fn compose_and_upload(
    ctx: &Orchestrator,
    run: &JobRun<'_>,
    template: &TemplateDefinition,
    photos: &[SlotSource],
    flyover: Option<&SlotSource>,
) -> PipelineResult<(String, bool)> {
    let resolved = template
        .resolve(photos, flyover)
        .map_err(|v| PipelineError::composition_failed(&template.name, v.to_string()))?;

    let slots: Vec<(String, f64)> = resolved
        .iter()
        .map(|(s, d)| (s.identity.clone(), *d))
        .collect();
    let cache_key = template_cache_key(&template.name, &slots);
    let output_key = template_output_key(
        &ctx.config.output_prefix,
        &run.job.listing_id,
        run.job.id.as_str(),
        &template.name,
    );
    let storage_retryable = |e: &reel_storage::StorageError| e.is_retryable();

    if let Some(asset) = ctx.cache.get(&cache_key).await? {
        if asset.path == output_key {
            return Ok((asset.path, true));
        }
        let bytes = ctx
            .retry
            .named("template_cache_read")
            .run_if(storage_retryable, || ctx.deps.store.get(&asset.path))
            .await?;
        let location = ctx
            .retry
            .named("template_upload")
            .run_if(storage_retryable, || {
                ctx.deps.store.put(bytes.clone(), &output_key, VIDEO_CONTENT_TYPE)
            })
            .await?;
        return Ok((location, true));
    }

    let output = run.work_dir.join(format!("{}.mp4", template.name));
    run.tracker.track(&output);
    let segments: Vec<(PathBuf, f64)> = resolved
        .iter()
        .map(|(s, d)| (s.path.clone(), *d))
        .collect();

    ctx.deps.composer.compose(template, &segments, &output).await?;

    let location = ctx
        .retry
        .named("template_upload")
        .run_if(storage_retryable, || {
            ctx.deps
                .store
                .upload_file(&output, &output_key, VIDEO_CONTENT_TYPE)
        })
        .await?;

    // The finished video doubles as the cache entry.
    match hash_file(&output).await {
        Ok(hash) => {
            if let Err(e) = ctx
                .cache
                .put_location(
                    &cache_key,
                    &location,
                    AssetType::ComposedTemplate,
                    &hash,
                    vec![run.job.listing_id.clone(), template.name.clone()],
                )
                .await
            {
                run.logger
                    .log_warning(&format!("Could not cache template {}: {}", template.name, e));
            }
        }
        Err(e) => run
            .logger
            .log_warning(&format!("Could not hash template {}: {}", template.name, e)),
    }

    Ok((location, false))
}
