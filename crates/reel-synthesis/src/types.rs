//! Request and task types shared by the generation services.

use std::fmt;

use reel_models::Coordinates;
use serde::{Deserialize, Serialize};

/// What a generation task is produced from.
#[derive(Debug, Clone)]
pub enum GenerationInput {
    /// Still image bytes (image-to-video).
    Image { data: Vec<u8>, mime_type: String },
    /// A location (flyover).
    Location(Coordinates),
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub input: GenerationInput,
    /// Requested clip length in seconds
    pub duration_secs: f64,
}

impl GenerationRequest {
    pub fn image(data: Vec<u8>, mime_type: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            input: GenerationInput::Image {
                data,
                mime_type: mime_type.into(),
            },
            duration_secs,
        }
    }

    pub fn location(coordinates: Coordinates, duration_secs: f64) -> Self {
        Self {
            input: GenerationInput::Location(coordinates),
            duration_secs,
        }
    }
}

/// Opaque id of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle(pub String);

impl TaskHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }

    /// Parse the vendor's status vocabulary.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" | "queued" | "submitted" => Some(TaskState::Pending),
            "running" | "processing" | "in_progress" => Some(TaskState::Running),
            "succeeded" | "success" | "completed" | "done" => Some(TaskState::Succeeded),
            "failed" | "error" | "cancelled" | "canceled" => Some(TaskState::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatus {
    pub state: TaskState,
    pub output_url: Option<String>,
    pub failure: Option<String>,
}

impl TaskStatus {
    pub fn pending() -> Self {
        Self {
            state: TaskState::Pending,
            output_url: None,
            failure: None,
        }
    }

    pub fn succeeded(url: impl Into<String>) -> Self {
        Self {
            state: TaskState::Succeeded,
            output_url: Some(url.into()),
            failure: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: TaskState::Failed,
            output_url: None,
            failure: Some(reason.into()),
        }
    }
}
