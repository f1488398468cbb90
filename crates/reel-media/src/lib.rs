//! FFmpeg CLI wrapper for composing listing reels.
//!
//! This crate provides:
//! - Type-safe multi-input FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Timeouts via tokio
//! - Template composition (trim, normalize and concatenate clips, optional music)
//! - FFprobe inspection of produced videos

pub mod command;
pub mod compose;
pub mod error;
pub mod probe;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use compose::{build_compose_command, build_filter_graph, compose, CompositionSpec, OutputSettings, Segment};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_video, VideoInfo};
pub use progress::{FfmpegProgress, ProgressCallback};
