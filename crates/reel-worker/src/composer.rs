//! Template composition seam.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use reel_media::{compose, CompositionSpec, FfmpegRunner, OutputSettings, Segment};
use reel_models::TemplateDefinition;

use crate::error::{PipelineError, PipelineResult};

/// Renders one template from resolved `(clip, seconds)` segments.
#[async_trait]
pub trait TemplateComposer: Send + Sync {
    async fn compose(
        &self,
        template: &TemplateDefinition,
        segments: &[(PathBuf, f64)],
        output: &Path,
    ) -> PipelineResult<()>;
}

/// FFmpeg-backed composer.
#[derive(Debug, Clone)]
pub struct FfmpegComposer {
    runner: FfmpegRunner,
    settings: OutputSettings,
    music_dir: Option<PathBuf>,
}

impl FfmpegComposer {
    pub fn new(timeout_secs: u64, music_dir: Option<PathBuf>) -> Self {
        Self {
            runner: FfmpegRunner::new().with_timeout(timeout_secs),
            settings: OutputSettings::default(),
            music_dir,
        }
    }

    /// Music bed for `template`, if configured and present on disk.
    fn music_for(&self, template: &TemplateDefinition) -> Option<PathBuf> {
        let name = template.music.as_deref()?;
        let dir = self.music_dir.as_ref()?;
        let path = dir.join(name);
        if path.is_file() {
            Some(path)
        } else {
            warn!(template = %template.name, path = %path.display(), "Music bed not found, composing silent");
            None
        }
    }

    pub fn build_composition(
        &self,
        template: &TemplateDefinition,
        segments: &[(PathBuf, f64)],
    ) -> CompositionSpec {
        CompositionSpec {
            segments: segments
                .iter()
                .map(|(path, duration)| Segment::new(path, *duration))
                .collect(),
            music: self.music_for(template),
            settings: self.settings.clone(),
        }
    }
}

#[async_trait]
impl TemplateComposer for FfmpegComposer {
    async fn compose(
        &self,
        template: &TemplateDefinition,
        segments: &[(PathBuf, f64)],
        output: &Path,
    ) -> PipelineResult<()> {
        let spec = self.build_composition(template, segments);
        let started = Instant::now();

        compose(&spec, output, &self.runner)
            .await
            .map_err(|e| PipelineError::composition_failed(&template.name, e.detail()))?;

        info!(
            template = %template.name,
            segments = spec.segments.len(),
            duration_secs = spec.total_duration(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Composed template"
        );
        Ok(())
    }
}
