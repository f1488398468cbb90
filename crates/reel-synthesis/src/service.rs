//! The generation service seam and its HTTP implementations.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tracing::info;

use crate::client::{ApiClient, ServiceConfig};
use crate::error::{SynthesisError, SynthesisResult};
use crate::types::{GenerationInput, GenerationRequest, TaskHandle, TaskStatus};

/// An external service that turns an input into a video clip asynchronously.
///
/// Callers submit once, poll until the task is terminal, then download the
/// output URL.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    async fn submit(&self, request: &GenerationRequest) -> SynthesisResult<TaskHandle>;

    async fn poll(&self, handle: &TaskHandle) -> SynthesisResult<TaskStatus>;

    async fn download(&self, url: &str) -> SynthesisResult<Vec<u8>>;
}

/// Image-to-video synthesis settings.
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub service: ServiceConfig,
    pub model: Option<String>,
    /// Seconds of motion requested per photo
    pub clip_duration_secs: f64,
}

impl SynthesisConfig {
    /// Load from `SYNTHESIS_*` environment variables.
    pub fn from_env() -> SynthesisResult<Self> {
        Ok(Self {
            service: ServiceConfig::from_env_prefix("SYNTHESIS")?,
            model: std::env::var("SYNTHESIS_MODEL").ok().filter(|s| !s.is_empty()),
            clip_duration_secs: std::env::var("SYNTHESIS_CLIP_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|d: &f64| *d > 0.0)
                .unwrap_or(5.0),
        })
    }
}

/// Flyover imagery settings.
#[derive(Debug, Clone)]
pub struct FlyoverConfig {
    pub service: ServiceConfig,
    pub clip_duration_secs: f64,
    /// Camera altitude in metres
    pub altitude_m: u32,
}

impl FlyoverConfig {
    /// Load from `FLYOVER_*` environment variables.
    pub fn from_env() -> SynthesisResult<Self> {
        Ok(Self {
            service: ServiceConfig::from_env_prefix("FLYOVER")?,
            clip_duration_secs: std::env::var("FLYOVER_CLIP_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|d: &f64| *d > 0.0)
                .unwrap_or(6.0),
            altitude_m: std::env::var("FLYOVER_ALTITUDE_M")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),
        })
    }
}

/// Image-to-video service reached over HTTP.
///
/// `POST /v1/image-to-video` with a base64 image returns a task id, and
/// `GET /v1/tasks/{id}` reports its status.
#[derive(Debug, Clone)]
pub struct HttpSynthesisService {
    api: ApiClient,
    config: SynthesisConfig,
}

impl HttpSynthesisService {
    pub fn new(config: SynthesisConfig) -> SynthesisResult<Self> {
        let api = ApiClient::new(&config.service)?;
        info!(base_url = %config.service.base_url, "Synthesis client initialized");
        Ok(Self { api, config })
    }

    pub fn from_env() -> SynthesisResult<Self> {
        Self::new(SynthesisConfig::from_env()?)
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }
}

#[async_trait]
impl GenerationService for HttpSynthesisService {
    fn name(&self) -> &'static str {
        "synthesis"
    }

    async fn submit(&self, request: &GenerationRequest) -> SynthesisResult<TaskHandle> {
        let GenerationInput::Image {
            ref data,
            ref mime_type,
        } = request.input
        else {
            return Err(SynthesisError::config_error(
                "synthesis service only accepts image input",
            ));
        };

        let body = json!({
            "image": BASE64.encode(data),
            "mime_type": mime_type,
            "duration": request.duration_secs,
            "model": self.config.model,
        });
        self.api.submit("v1/image-to-video", &body).await
    }

    async fn poll(&self, handle: &TaskHandle) -> SynthesisResult<TaskStatus> {
        self.api.poll(&format!("v1/tasks/{}", handle)).await
    }

    async fn download(&self, url: &str) -> SynthesisResult<Vec<u8>> {
        self.api.download(url).await
    }
}

/// Flyover imagery service reached over HTTP.
///
/// `POST /v1/flyovers` with a location returns a task id, and
/// `GET /v1/flyovers/{id}` reports its status.
#[derive(Debug, Clone)]
pub struct HttpFlyoverService {
    api: ApiClient,
    config: FlyoverConfig,
}

impl HttpFlyoverService {
    pub fn new(config: FlyoverConfig) -> SynthesisResult<Self> {
        let api = ApiClient::new(&config.service)?;
        info!(base_url = %config.service.base_url, "Flyover client initialized");
        Ok(Self { api, config })
    }

    pub fn from_env() -> SynthesisResult<Self> {
        Self::new(FlyoverConfig::from_env()?)
    }

    pub fn config(&self) -> &FlyoverConfig {
        &self.config
    }
}

#[async_trait]
impl GenerationService for HttpFlyoverService {
    fn name(&self) -> &'static str {
        "flyover"
    }

    async fn submit(&self, request: &GenerationRequest) -> SynthesisResult<TaskHandle> {
        let GenerationInput::Location(coords) = request.input else {
            return Err(SynthesisError::config_error(
                "flyover service only accepts location input",
            ));
        };

        let body = json!({
            "lat": coords.lat,
            "lng": coords.lng,
            "duration": request.duration_secs,
            "altitude": self.config.altitude_m,
        });
        self.api.submit("v1/flyovers", &body).await
    }

    async fn poll(&self, handle: &TaskHandle) -> SynthesisResult<TaskStatus> {
        self.api.poll(&format!("v1/flyovers/{}", handle)).await
    }

    async fn download(&self, url: &str) -> SynthesisResult<Vec<u8>> {
        self.api.download(url).await
    }
}
