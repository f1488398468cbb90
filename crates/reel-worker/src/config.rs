//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse(name, default))
}

/// Process-level settings for the queue consumer.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// How long a consume call blocks waiting for new tasks
    pub consume_block: Duration,
    /// How often to reclaim tasks abandoned by crashed workers
    pub claim_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Prometheus exporter port; unset disables the exporter
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            consume_block: Duration::from_secs(1),
            claim_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(60),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS", defaults.max_concurrent_jobs).max(1),
            consume_block: Duration::from_millis(env_parse("WORKER_CONSUME_BLOCK_MS", 1000)),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS", 30),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT", 60),
            metrics_port: std::env::var("METRICS_PORT").ok().and_then(|s| s.parse().ok()),
        }
    }
}

/// Settings for one orchestrator run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Photos synthesized in parallel per batch
    pub synthesis_batch_size: usize,
    /// Templates composed in parallel per batch
    pub template_batch_size: usize,
    /// Progress is written every N stage completions
    pub progress_flush_every: u32,
    /// Key prefix for finished videos
    pub output_prefix: String,
    /// Root for per-job scratch directories
    pub work_dir: PathBuf,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    /// Attempts for submit, download and storage transfers
    pub transfer_attempts: u32,
    pub retry_base_delay: Duration,
    pub ffmpeg_timeout_secs: u64,
    /// Directory holding template music beds
    pub music_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            synthesis_batch_size: 3,
            template_batch_size: 3,
            progress_flush_every: 3,
            output_prefix: "listings".to_string(),
            work_dir: PathBuf::from("/tmp/reel"),
            // 60 x 5 s is roughly five minutes per clip
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 60,
            transfer_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            ffmpeg_timeout_secs: 600,
            music_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            synthesis_batch_size: env_parse("PIPELINE_SYNTHESIS_BATCH_SIZE", d.synthesis_batch_size)
                .max(1),
            template_batch_size: env_parse("PIPELINE_TEMPLATE_BATCH_SIZE", d.template_batch_size)
                .max(1),
            progress_flush_every: env_parse("PIPELINE_PROGRESS_FLUSH_EVERY", d.progress_flush_every)
                .max(1),
            output_prefix: std::env::var("PIPELINE_OUTPUT_PREFIX").unwrap_or(d.output_prefix),
            work_dir: std::env::var("PIPELINE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.work_dir),
            poll_interval: env_secs("PIPELINE_POLL_INTERVAL_SECS", 5),
            max_poll_attempts: env_parse("PIPELINE_MAX_POLL_ATTEMPTS", d.max_poll_attempts).max(1),
            transfer_attempts: env_parse("PIPELINE_TRANSFER_ATTEMPTS", d.transfer_attempts).max(1),
            retry_base_delay: Duration::from_millis(env_parse("PIPELINE_RETRY_BASE_MS", 500)),
            ffmpeg_timeout_secs: env_parse("PIPELINE_FFMPEG_TIMEOUT_SECS", d.ffmpeg_timeout_secs),
            music_dir: std::env::var("PIPELINE_MUSIC_DIR").ok().map(PathBuf::from),
        }
    }
}

/// Artifact cache expiry tiers.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub short_ttl: chrono::Duration,
    pub long_ttl: chrono::Duration,
    /// Entries hit more often than this get the long window
    pub frequent_threshold: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            short_ttl: chrono::Duration::hours(24),
            long_ttl: chrono::Duration::days(7),
            frequent_threshold: 5,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            short_ttl: chrono::Duration::hours(env_parse("CACHE_SHORT_TTL_HOURS", 24)),
            long_ttl: chrono::Duration::days(env_parse("CACHE_LONG_TTL_DAYS", 7)),
            frequent_threshold: env_parse("CACHE_FREQUENT_THRESHOLD", d.frequent_threshold),
        }
    }
}

/// Startup recovery scan.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub enabled: bool,
    /// Only jobs created within this window are considered
    pub window: chrono::Duration,
    pub limit: usize,
    /// Also resubmit jobs stuck in PROCESSING
    pub include_processing: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: chrono::Duration::hours(24),
            limit: 5,
            include_processing: false,
        }
    }
}

impl RecoveryConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            enabled: env_parse("RECOVERY_ENABLED", d.enabled),
            window: chrono::Duration::hours(env_parse("RECOVERY_WINDOW_HOURS", 24)),
            limit: env_parse("RECOVERY_LIMIT", d.limit),
            include_processing: env_parse("RECOVERY_INCLUDE_PROCESSING", d.include_processing),
        }
    }
}
