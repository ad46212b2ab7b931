//! AI provider abstractions and implementations.
//!
//! The studio flows only see these traits, so the Gemini client can be
//! swapped for the mock in tests and offline runs.

pub mod gemini;
pub mod mock;

use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio_stream::Stream;

use crate::models::image::{AspectRatio, ImageBlob};

/// Error type for provider operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Content filtered")]
    ContentFiltered,

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl ProviderError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::NotConfigured(_) => "not_configured",
            ProviderError::ApiError(_) => "api_error",
            ProviderError::InvalidRequest(_) => "invalid_request",
            ProviderError::AccessDenied(_) => "access_denied",
            ProviderError::RateLimited => "rate_limited",
            ProviderError::ContentFiltered => "content_filtered",
            ProviderError::NetworkError(_) => "network_error",
        }
    }
}

/// Stream chunk for streaming chat responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// Text delta.
    Text(String),

    /// Final completion with usage stats.
    Complete {
        input_tokens: i32,
        output_tokens: i32,
        finish_reason: Option<String>,
    },
}

/// Type alias for provider streams.
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// A stateful conversation held by the provider side.
#[async_trait]
pub trait Dialogue: Send + Sync {
    /// Send one user message and stream the model's reply.
    ///
    /// The exchange joins the dialogue history only once its stream has
    /// completed.
    async fn send_message_stream(&self, message: &str) -> Result<ProviderStream, ProviderError>;
}

/// Trait for conversational providers (e.g., Gemini chat).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Open a new dialogue steered by `system_instruction`.
    fn open_dialogue(&self, system_instruction: &str) -> Arc<dyn Dialogue>;

    /// Model identifier used in logs and metrics.
    fn model(&self) -> &str;

    /// Health check.
    async fn health_check(&self) -> Result<(), ProviderError>;
}

/// One part of an image request, in payload order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPart {
    Text(String),
    Image(ImageBlob),
}

/// A single multi-part image generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub parts: Vec<RequestPart>,
    pub aspect_ratio: AspectRatio,
}

/// One part of the provider's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    Text(String),
    Image(ImageBlob),
}

/// Raw image generation result, before the studio decides whether it is
/// usable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageResponse {
    /// Parts of the first candidate.
    pub parts: Vec<ResponsePart>,

    /// `finishReason` of the first candidate, as sent by the provider.
    pub finish_reason: Option<String>,

    /// Set when the prompt was blocked and no candidate was produced.
    pub prompt_block_reason: Option<String>,

    /// Input tokens consumed.
    pub input_tokens: i32,

    /// Output tokens generated.
    pub output_tokens: i32,
}

/// Trait for image generation/editing providers (e.g., Gemini image).
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Submit one request and return the first candidate.
    async fn generate(&self, request: &ImageRequest) -> Result<ImageResponse, ProviderError>;

    /// Model identifier used in logs and metrics.
    fn model(&self) -> &str;

    /// Health check.
    async fn health_check(&self) -> Result<(), ProviderError>;
}
