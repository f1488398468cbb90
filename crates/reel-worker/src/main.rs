//! Listing reel worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_firestore::{FirestoreAssetIndex, FirestoreClient, FirestoreJobStore, FirestoreListingLookup};
use reel_models::TemplateRegistry;
use reel_queue::JobQueue;
use reel_storage::R2Client;
use reel_synthesis::{HttpFlyoverService, HttpSynthesisService};
use reel_worker::{
    AssetCache, CacheConfig, ClipGenerator, FfmpegComposer, FlyoverGenerator, JobExecutor,
    Orchestrator, PipelineConfig, PipelineDeps, PollSettings, QueueSubmitter, RecoveryConfig,
    RecoveryScanner, RetryPolicy, WorkerConfig,
};

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "reel=info".parse::<Directive>() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

async fn build_orchestrator(
    jobs: Arc<FirestoreJobStore>,
    firestore: FirestoreClient,
) -> anyhow::Result<Orchestrator> {
    let pipeline_config = PipelineConfig::from_env();
    let cache_config = CacheConfig::from_env();

    let store = Arc::new(R2Client::from_env().context("Failed to configure object store")?);
    if let Err(e) = store.check_connectivity().await {
        warn!("Object store not reachable at startup: {}", e);
    }
    let assets = Arc::new(FirestoreAssetIndex::new(firestore.clone()));
    let listings = Arc::new(FirestoreListingLookup::new(firestore));

    let registry = TemplateRegistry::from_env().context("Failed to load template registry")?;
    info!(templates = ?registry.names(), "Template registry loaded");

    let retry = RetryPolicy::new("pipeline")
        .with_max_attempts(pipeline_config.transfer_attempts)
        .with_base_delay(pipeline_config.retry_base_delay);
    let poll = PollSettings {
        interval: pipeline_config.poll_interval,
        max_attempts: pipeline_config.max_poll_attempts,
    };

    let synthesis = HttpSynthesisService::from_env().context("Failed to configure synthesis service")?;
    let clip_duration = synthesis.config().clip_duration_secs;
    let clip_generator = ClipGenerator::new(
        Arc::new(synthesis),
        store.clone(),
        retry.clone(),
        poll,
        clip_duration,
    );

    let flyover_generator = match HttpFlyoverService::from_env() {
        Ok(service) => {
            let duration = service.config().clip_duration_secs;
            Some(Arc::new(FlyoverGenerator::new(
                Arc::new(service),
                retry.clone(),
                poll,
                duration,
            )))
        }
        Err(e) => {
            warn!("Flyover service not configured, flyover templates will fail: {}", e);
            None
        }
    };

    let composer = FfmpegComposer::new(
        pipeline_config.ffmpeg_timeout_secs,
        pipeline_config.music_dir.clone(),
    );

    let cache = AssetCache::new(store.clone(), assets, cache_config, retry);

    let deps = PipelineDeps {
        jobs,
        listings,
        store,
        clip_generator: Arc::new(clip_generator),
        flyover_generator,
        composer: Arc::new(composer),
        registry: Arc::new(registry),
    };

    Ok(Orchestrator::new(deps, cache, pipeline_config))
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        init_metrics(port)?;
    }

    reel_media::check_ffmpeg().context("FFmpeg is required")?;

    let firestore = FirestoreClient::from_env()
        .await
        .context("Failed to create Firestore client")?;
    let jobs = Arc::new(FirestoreJobStore::new(firestore.clone()));
    let orchestrator = Arc::new(build_orchestrator(jobs.clone(), firestore).await?);

    let queue = Arc::new(JobQueue::from_env().context("Failed to create job queue")?);
    queue.init().await.context("Failed to initialize job queue")?;

    let scanner = RecoveryScanner::new(
        jobs,
        Arc::new(QueueSubmitter::new(Arc::clone(&queue))),
        RecoveryConfig::from_env(),
    );
    match scanner.run().await {
        Ok(report) => info!(?report, "Startup recovery complete"),
        Err(e) => warn!("Startup recovery failed: {}", e),
    }

    let executor = Arc::new(JobExecutor::new(config, queue, orchestrator));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    executor.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    // A provider may already be installed by a dependency.
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting reel-worker");

    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
