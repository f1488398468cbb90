//! Shared HTTP plumbing for the generation services.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{SynthesisError, SynthesisResult};
use crate::types::{TaskHandle, TaskState, TaskStatus};

/// Connection settings for one generation service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl ServiceConfig {
    /// Read `{PREFIX}_API_URL`, `{PREFIX}_API_KEY` and `{PREFIX}_TIMEOUT_SECS`.
    pub(crate) fn from_env_prefix(prefix: &str) -> SynthesisResult<Self> {
        let url_var = format!("{}_API_URL", prefix);
        let base_url = std::env::var(&url_var)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SynthesisError::config_error(format!("{} must be set", url_var)))?;

        let timeout_secs: u64 = std::env::var(format!("{}_TIMEOUT_SECS", prefix))
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        Ok(Self {
            base_url,
            api_key: std::env::var(format!("{}_API_KEY", prefix))
                .ok()
                .filter(|s| !s.is_empty()),
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(10),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(alias = "task_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default, alias = "video_url", alias = "output")]
    output_url: Option<String>,
    #[serde(default, alias = "failure", alias = "message")]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ApiClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl ApiClient {
    pub(crate) fn new(config: &ServiceConfig) -> SynthesisResult<Self> {
        // Trailing slash so `join` appends instead of replacing the last segment.
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: Url::parse(&base)?,
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> SynthesisResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn check(response: Response) -> SynthesisResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SynthesisError::from_http_status(status.as_u16(), body))
    }

    async fn json<T: DeserializeOwned>(response: Response) -> SynthesisResult<T> {
        let body = Self::check(response).await?.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            SynthesisError::invalid_response(format!("{}: {}", e, truncate(&body, 200)))
        })
    }

    pub(crate) async fn submit<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> SynthesisResult<TaskHandle> {
        let url = self.url(path)?;
        debug!(%url, "Submitting generation task");

        let response = self.authed(self.http.post(url)).json(body).send().await?;
        let submitted: SubmitResponse = Self::json(response).await?;

        if submitted.id.is_empty() {
            return Err(SynthesisError::invalid_response("empty task id"));
        }
        Ok(TaskHandle(submitted.id))
    }

    pub(crate) async fn poll(&self, path: &str) -> SynthesisResult<TaskStatus> {
        let response = self.authed(self.http.get(self.url(path)?)).send().await?;
        let status: StatusResponse = Self::json(response).await?;

        let state = TaskState::parse_lenient(&status.status).ok_or_else(|| {
            SynthesisError::invalid_response(format!("unknown task status '{}'", status.status))
        })?;

        if state == TaskState::Succeeded && status.output_url.is_none() {
            return Err(SynthesisError::invalid_response(
                "task succeeded without an output url",
            ));
        }

        Ok(TaskStatus {
            state,
            output_url: status.output_url,
            failure: status.error,
        })
    }

    /// Fetch a finished artifact. Relative URLs resolve against the service.
    pub(crate) async fn download(&self, url: &str) -> SynthesisResult<Vec<u8>> {
        let url = match Url::parse(url) {
            Ok(absolute) => absolute,
            Err(url::ParseError::RelativeUrlWithoutBase) => self.url(url)?,
            Err(e) => return Err(e.into()),
        };

        // Output URLs are often signed CDN links; only send the key to the service itself.
        let same_origin = url.origin() == self.base_url.origin();
        let request = self.http.get(url);
        let request = if same_origin { self.authed(request) } else { request };

        let response = request.send().await?;
        let bytes = Self::check(response).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(SynthesisError::invalid_response("downloaded artifact is empty"));
        }
        Ok(bytes.to_vec())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
