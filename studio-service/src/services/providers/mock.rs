//! Mock provider implementations for testing and offline runs.

use super::{
    ChatProvider, Dialogue, ImageProvider, ImageRequest, ImageResponse, ProviderError,
    ProviderStream, ResponsePart, StreamChunk,
};
use crate::models::image::ImageBlob;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// The 1x1 transparent PNG every default mock edit returns.
pub const MOCK_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

#[derive(Debug, Clone)]
enum ChatScript {
    /// Echo the prompt back in a few chunks.
    Echo,
    /// Fixed chunks, regardless of the prompt.
    Chunks(Vec<String>),
}

/// Mock chat provider for testing.
#[derive(Debug, Clone)]
pub struct MockChatProvider {
    enabled: bool,
    script: ChatScript,
    fail_after: Option<usize>,
    chunk_delay: Duration,
}

impl MockChatProvider {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            script: ChatScript::Echo,
            fail_after: None,
            chunk_delay: Duration::ZERO,
        }
    }

    /// Reply with exactly these chunks.
    pub fn with_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script = ChatScript::Chunks(chunks.into_iter().map(Into::into).collect());
        self
    }

    /// Emit a network error after `count` chunks instead of completing.
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Sleep before every chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    fn open_dialogue(&self, _system_instruction: &str) -> Arc<dyn Dialogue> {
        Arc::new(MockDialogue {
            provider: self.clone(),
        })
    }

    fn model(&self) -> &str {
        "mock-chat"
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.enabled {
            Ok(())
        } else {
            Err(ProviderError::NotConfigured(
                "Mock chat provider not enabled".to_string(),
            ))
        }
    }
}

struct MockDialogue {
    provider: MockChatProvider,
}

#[async_trait]
impl Dialogue for MockDialogue {
    async fn send_message_stream(&self, message: &str) -> Result<ProviderStream, ProviderError> {
        let provider = &self.provider;
        if !provider.enabled {
            return Err(ProviderError::NotConfigured(
                "Mock chat provider not enabled".to_string(),
            ));
        }

        let texts: Vec<String> = match &provider.script {
            ChatScript::Echo => vec![
                "Mock".to_string(),
                " streaming".to_string(),
                " response".to_string(),
                " for:".to_string(),
                format!(" {}", message),
            ],
            ChatScript::Chunks(chunks) => chunks.clone(),
        };

        let mut chunks: Vec<Result<StreamChunk, ProviderError>> = Vec::new();
        match provider.fail_after {
            Some(count) => {
                chunks.extend(texts.into_iter().take(count).map(|t| Ok(StreamChunk::Text(t))));
                chunks.push(Err(ProviderError::NetworkError(
                    "connection reset by mock".to_string(),
                )));
            }
            None => {
                let output_tokens = texts.len() as i32;
                chunks.extend(texts.into_iter().map(|t| Ok(StreamChunk::Text(t))));
                chunks.push(Ok(StreamChunk::Complete {
                    input_tokens: message.len() as i32 / 4,
                    output_tokens,
                    finish_reason: Some("STOP".to_string()),
                }));
            }
        }

        let delay = provider.chunk_delay;
        let stream = tokio_stream::iter(chunks).then(move |chunk| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            chunk
        });

        Ok(Box::pin(stream))
    }
}

/// Mock image provider for testing. Records every request it receives.
#[derive(Clone)]
pub struct MockImageProvider {
    enabled: bool,
    response: Result<ImageResponse, ProviderError>,
    delay: Duration,
    requests: Arc<Mutex<Vec<ImageRequest>>>,
}

impl MockImageProvider {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            response: Ok(ImageResponse {
                parts: vec![ResponsePart::Image(ImageBlob::new(
                    "image/png",
                    MOCK_PNG.to_vec(),
                ))],
                finish_reason: Some("STOP".to_string()),
                prompt_block_reason: None,
                input_tokens: 0,
                output_tokens: 1290,
            }),
            delay: Duration::ZERO,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer every request with `response`.
    pub fn with_response(mut self, response: ImageResponse) -> Self {
        self.response = Ok(response);
        self
    }

    /// Fail every request with `error`.
    pub fn with_error(mut self, error: ProviderError) -> Self {
        self.response = Err(error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requests received so far, oldest first.
    pub async fn requests(&self) -> Vec<ImageRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ImageProvider for MockImageProvider {
    async fn generate(&self, request: &ImageRequest) -> Result<ImageResponse, ProviderError> {
        if !self.enabled {
            return Err(ProviderError::NotConfigured(
                "Mock image provider not enabled".to_string(),
            ));
        }

        self.requests.lock().await.push(request.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.response.clone()
    }

    fn model(&self) -> &str {
        "mock-image"
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.enabled {
            Ok(())
        } else {
            Err(ProviderError::NotConfigured(
                "Mock image provider not enabled".to_string(),
            ))
        }
    }
}
