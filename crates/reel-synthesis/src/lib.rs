//! Clients for the external generation services.
//!
//! Both the image-to-video synthesis service and the flyover imagery service
//! follow the same submit / poll / download protocol and are exposed through
//! the [`GenerationService`] trait.

pub mod client;
pub mod error;
pub mod service;
pub mod types;

pub use client::ServiceConfig;
pub use error::{SynthesisError, SynthesisResult};
pub use service::{
    FlyoverConfig, GenerationService, HttpFlyoverService, HttpSynthesisService, SynthesisConfig,
};
pub use types::{GenerationInput, GenerationRequest, TaskHandle, TaskState, TaskStatus};
