//! Template composition.
//!
//! Each segment is one input clip held for a fixed duration: the clip is
//! padded by cloning its last frame when short, trimmed when long, scaled and
//! cropped to the output frame, then all segments are concatenated. A music
//! bed, when present, is looped to cover the whole edit.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// One clip placed in the edit.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub path: PathBuf,
    /// Seconds on screen
    pub duration: f64,
}

impl Segment {
    pub fn new(path: impl Into<PathBuf>, duration: f64) -> Self {
        Self {
            path: path.into(),
            duration,
        }
    }
}

/// Output frame and encoder settings.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub crf: u8,
    pub preset: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        // Vertical 9:16 for reels
        Self {
            width: 1080,
            height: 1920,
            fps: 30,
            crf: 20,
            preset: "veryfast".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompositionSpec {
    pub segments: Vec<Segment>,
    pub music: Option<PathBuf>,
    pub settings: OutputSettings,
}

impl CompositionSpec {
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }

    pub fn validate(&self) -> MediaResult<()> {
        if self.segments.is_empty() {
            return Err(MediaError::invalid_composition("no segments"));
        }
        if let Some((i, s)) = self
            .segments
            .iter()
            .enumerate()
            .find(|(_, s)| !s.duration.is_finite() || s.duration <= 0.0)
        {
            return Err(MediaError::invalid_composition(format!(
                "segment {} has invalid duration {}",
                i, s.duration
            )));
        }
        if self.settings.width == 0 || self.settings.height == 0 || self.settings.fps == 0 {
            return Err(MediaError::invalid_composition("zero output dimension or fps"));
        }
        Ok(())
    }
}

/// Build the `-filter_complex` graph for `segment_count` inputs numbered from 0.
pub fn build_filter_graph(segments: &[Segment], settings: &OutputSettings) -> String {
    let (w, h) = (settings.width, settings.height);
    let mut graph = String::new();

    for (i, segment) in segments.iter().enumerate() {
        graph.push_str(&format!(
            "[{i}:v]setpts=PTS-STARTPTS,\
             tpad=stop_mode=clone:stop_duration={d:.3},\
             trim=duration={d:.3},setpts=PTS-STARTPTS,\
             scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},\
             setsar=1,fps={fps},format=yuv420p[v{i}];",
            i = i,
            d = segment.duration,
            w = w,
            h = h,
            fps = settings.fps,
        ));
    }

    for i in 0..segments.len() {
        graph.push_str(&format!("[v{}]", i));
    }
    graph.push_str(&format!("concat=n={}:v=1:a=0[outv]", segments.len()));
    graph
}

/// Build the full FFmpeg command for a composition.
pub fn build_compose_command(spec: &CompositionSpec, output: &Path) -> FfmpegCommand {
    let settings = &spec.settings;

    let mut cmd = spec
        .segments
        .iter()
        .fold(FfmpegCommand::new(output), |cmd, s| cmd.input(&s.path));

    if let Some(ref music) = spec.music {
        cmd = cmd.input_with_args(music, ["-stream_loop", "-1"]);
    }

    cmd = cmd
        .filter_complex(build_filter_graph(&spec.segments, settings))
        .map("[outv]");

    if spec.music.is_some() {
        cmd = cmd
            .map(format!("{}:a", spec.segments.len()))
            .audio_codec("aac")
            .output_arg("-b:a")
            .output_arg("192k");
    } else {
        cmd = cmd.output_arg("-an");
    }

    cmd.video_codec("libx264")
        .preset(settings.preset.clone())
        .crf(settings.crf)
        .pixel_format("yuv420p")
        .output_args(["-movflags", "+faststart"])
        .max_duration(spec.total_duration())
}

/// Compose `spec` into `output`.
pub async fn compose(spec: &CompositionSpec, output: &Path, runner: &FfmpegRunner) -> MediaResult<()> {
    spec.validate()?;

    for segment in &spec.segments {
        if !segment.path.exists() {
            return Err(MediaError::FileNotFound(segment.path.clone()));
        }
    }
    if let Some(ref music) = spec.music {
        if !music.exists() {
            return Err(MediaError::FileNotFound(music.clone()));
        }
    }

    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let cmd = build_compose_command(spec, output);
    debug!(
        segments = spec.segments.len(),
        duration = spec.total_duration(),
        output = %output.display(),
        "Composing template video"
    );

    runner.run(&cmd).await?;

    let meta = tokio::fs::metadata(output)
        .await
        .map_err(|_| MediaError::FileNotFound(output.to_path_buf()))?;
    if meta.len() == 0 {
        return Err(MediaError::InvalidVideo(format!(
            "{} is empty",
            output.display()
        )));
    }

    info!(
        output = %output.display(),
        bytes = meta.len(),
        "Composed template video"
    );
    Ok(())
}
