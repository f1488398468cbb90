//! Error types for the generation services.

use thiserror::Error;

pub type SynthesisResult<T> = Result<T, SynthesisError>;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited by generation service")]
    RateLimited,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl SynthesisError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            429 => Self::RateLimited,
            _ => Self::Api {
                status,
                message: message.into(),
            },
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            SynthesisError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SynthesisError::RateLimited => true,
            SynthesisError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(SynthesisError::from_http_status(429, "slow down").is_retryable());
        assert!(SynthesisError::from_http_status(502, "bad gateway").is_retryable());
        assert!(!SynthesisError::from_http_status(400, "bad image").is_retryable());
        assert!(!SynthesisError::invalid_response("no id").is_retryable());
    }
}
