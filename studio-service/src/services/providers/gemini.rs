//! Gemini AI provider implementation.
//!
//! Chat goes through `streamGenerateContent` with server-sent events; image
//! edits are a single `generateContent` call carrying inline image parts.

use super::{
    ChatProvider, Dialogue, ImageProvider, ImageRequest, ImageResponse, ProviderError,
    ProviderStream, RequestPart, ResponsePart, StreamChunk,
};
use crate::models::image::{ImageBlob, DEFAULT_IMAGE_MIME};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

/// Gemini API base URL.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The key travels in this header, never in the URL.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini provider configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }
}

/// HTTP plumbing shared by the chat and image providers.
struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

impl GeminiClient {
    fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Build the API URL for the given model and method.
    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.config.base_url, self.config.model, method
        )
    }

    async fn post(
        &self,
        url: &str,
        request: &GenerateContentRequest,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &error_text));
        }

        Ok(response)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(
                "Gemini API key not configured".to_string(),
            ));
        }

        // Try to list models to verify API key works
        let url = format!("{}/models", self.config.base_url);

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(network_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::ApiError(format!(
                "Health check failed: {}",
                response.status()
            )))
        }
    }
}

/// reqwest puts the request URL in its error text; keep it out of messages.
fn network_error(e: reqwest::Error) -> ProviderError {
    ProviderError::NetworkError(e.without_url().to_string())
}

fn status_error(status: u16, body: &str) -> ProviderError {
    if body.contains("SAFETY") {
        return ProviderError::ContentFiltered;
    }

    let message = format!("Gemini API error {}: {}", status, body);
    match status {
        400 => ProviderError::InvalidRequest(message),
        401 | 403 => ProviderError::AccessDenied(message),
        429 => ProviderError::RateLimited,
        _ => ProviderError::ApiError(message),
    }
}

// ============================================================================
// Chat
// ============================================================================

/// Gemini chat provider.
pub struct GeminiChatProvider {
    client: Arc<GeminiClient>,
}

impl GeminiChatProvider {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: Arc::new(GeminiClient::new(config)?),
        })
    }
}

#[async_trait]
impl ChatProvider for GeminiChatProvider {
    fn open_dialogue(&self, system_instruction: &str) -> Arc<dyn Dialogue> {
        Arc::new(GeminiDialogue {
            client: Arc::clone(&self.client),
            system_instruction: Content::text(None, system_instruction),
            history: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn model(&self) -> &str {
        &self.client.config.model
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.client.health_check().await
    }
}

/// One chat session; the client side owns the history and replays it on
/// every turn.
struct GeminiDialogue {
    client: Arc<GeminiClient>,
    system_instruction: Content,
    history: Arc<Mutex<Vec<Content>>>,
}

#[async_trait]
impl Dialogue for GeminiDialogue {
    async fn send_message_stream(&self, message: &str) -> Result<ProviderStream, ProviderError> {
        let user_turn = Content::text(Some("user"), message);

        let mut contents = self.history.lock().await.clone();
        contents.push(user_turn.clone());

        let request = GenerateContentRequest {
            contents,
            system_instruction: Some(self.system_instruction.clone()),
            generation_config: None,
        };

        let url = format!("{}?alt=sse", self.client.api_url("streamGenerateContent"));

        tracing::debug!(
            model = %self.client.config.model,
            message_len = message.len(),
            history_len = request.contents.len() - 1,
            "Starting streaming request to Gemini API"
        );

        let response = self.client.post(&url, &request, None).await?;

        // Create channel for streaming
        let (tx, rx) = mpsc::channel(32);
        let history = Arc::clone(&self.history);

        // Spawn task to process SSE stream
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut events = SseBuffer::default();
            let mut reply = String::new();
            let mut input_tokens = 0i32;
            let mut output_tokens = 0i32;
            let mut finish_reason = None;

            while let Some(chunk_result) = stream.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(network_error(e)))
                            .await;
                        return;
                    }
                };

                for data in events.push(&chunk) {
                    let response = match serde_json::from_str::<GenerateContentResponse>(&data) {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping unparseable SSE event");
                            continue;
                        }
                    };

                    if let Some(error) = response.error {
                        let _ = tx.send(Err(status_error(error.code, &error.message))).await;
                        return;
                    }

                    if let Some(usage) = &response.usage_metadata {
                        input_tokens = usage.prompt_token_count.unwrap_or(input_tokens);
                        output_tokens = usage.candidates_token_count.unwrap_or(output_tokens);
                    }

                    if let Some(candidate) = response.candidates.first() {
                        let text = candidate_text(candidate);
                        if !text.is_empty() {
                            reply.push_str(&text);
                            let _ = tx.send(Ok(StreamChunk::Text(text))).await;
                        }
                        if candidate.finish_reason.is_some() {
                            finish_reason = candidate.finish_reason.clone();
                        }
                    }
                }
            }

            history
                .lock()
                .await
                .extend([user_turn, Content::text(Some("model"), &reply)]);

            let _ = tx
                .send(Ok(StreamChunk::Complete {
                    input_tokens,
                    output_tokens,
                    finish_reason,
                }))
                .await;
        });

        let stream = ReceiverStream::new(rx);
        Ok(Box::pin(stream) as ProviderStream)
    }
}

/// Concatenated non-thought text of one candidate.
fn candidate_text(candidate: &Candidate) -> String {
    candidate
        .content
        .iter()
        .flat_map(|content| content.parts.iter())
        .filter_map(|part| match part {
            ContentPart::Text { text, thought } if !thought.unwrap_or(false) => {
                Some(text.as_str())
            }
            _ => None,
        })
        .collect()
}

/// Splits a byte stream into SSE `data` payloads.
///
/// Events end at a blank line (`\n\n` or `\r\n\r\n`); bytes are held until
/// the whole event has arrived so multi-byte characters are never split.
#[derive(Debug, Default)]
struct SseBuffer {
    buffer: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some((end, separator_len)) = find_event_end(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end + separator_len).collect();
            let event = String::from_utf8_lossy(&event[..end]);

            let data: Vec<&str> = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|data| data.strip_prefix(' ').unwrap_or(data))
                .collect();

            if !data.is_empty() {
                payloads.push(data.join("\n"));
            }
        }
        payloads
    }
}

fn find_event_end(buffer: &[u8]) -> Option<(usize, usize)> {
    (0..buffer.len()).find_map(|i| {
        let rest = &buffer[i..];
        if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else if rest.starts_with(b"\n\n") {
            Some((i, 2))
        } else {
            None
        }
    })
}

// ============================================================================
// Image
// ============================================================================

/// Gemini image provider.
pub struct GeminiImageProvider {
    client: GeminiClient,
}

impl GeminiImageProvider {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: GeminiClient::new(config)?,
        })
    }
}

#[async_trait]
impl ImageProvider for GeminiImageProvider {
    async fn generate(&self, request: &ImageRequest) -> Result<ImageResponse, ProviderError> {
        let body = image_request_body(request);
        let url = self.client.api_url("generateContent");

        tracing::debug!(
            model = %self.client.config.model,
            parts = request.parts.len(),
            aspect_ratio = %request.aspect_ratio,
            "Sending image request to Gemini API"
        );

        let response = self
            .client
            .post(&url, &body, Some(REQUEST_TIMEOUT))
            .await?;

        let api_response: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError(format!("Failed to parse response: {}", e)))?;

        into_image_response(api_response)
    }

    fn model(&self) -> &str {
        &self.client.config.model
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.client.health_check().await
    }
}

fn image_request_body(request: &ImageRequest) -> GenerateContentRequest {
    let parts = request
        .parts
        .iter()
        .map(|part| match part {
            RequestPart::Text(text) => ContentPart::Text {
                text: text.clone(),
                thought: None,
            },
            RequestPart::Image(image) => ContentPart::InlineData {
                inline_data: InlineData {
                    mime_type: image.mime_type().to_string(),
                    data: image.to_base64(),
                },
            },
        })
        .collect();

    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts,
        }],
        system_instruction: None,
        generation_config: Some(GenerationConfig {
            response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
            image_config: Some(ImageConfig {
                aspect_ratio: request.aspect_ratio.as_str().to_string(),
            }),
        }),
    }
}

fn into_image_response(api_response: GenerateContentResponse) -> Result<ImageResponse, ProviderError> {
    if let Some(error) = api_response.error {
        return Err(status_error(error.code, &error.message));
    }

    let usage = api_response.usage_metadata.unwrap_or_default();
    let prompt_block_reason = api_response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason);

    let mut parts = Vec::new();
    let mut finish_reason = None;

    if let Some(candidate) = api_response.candidates.into_iter().next() {
        finish_reason = candidate.finish_reason;
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            match part {
                ContentPart::Text { text, thought } => {
                    if !thought.unwrap_or(false) && !text.is_empty() {
                        parts.push(ResponsePart::Text(text));
                    }
                }
                ContentPart::InlineData { inline_data } => {
                    if inline_data.data.is_empty() {
                        continue;
                    }
                    let mime_type = if inline_data.mime_type.is_empty() {
                        DEFAULT_IMAGE_MIME
                    } else {
                        inline_data.mime_type.as_str()
                    };
                    let image = ImageBlob::from_base64(mime_type, &inline_data.data).map_err(|e| {
                        ProviderError::ApiError(format!("Invalid inline image data: {}", e))
                    })?;
                    parts.push(ResponsePart::Image(image));
                }
                ContentPart::Other(_) => {}
            }
        }
    }

    Ok(ImageResponse {
        parts,
        finish_reason,
        prompt_block_reason,
        input_tokens: usage.prompt_token_count.unwrap_or(0),
        output_tokens: usage.candidates_token_count.unwrap_or(0),
    })
}

// ============================================================================
// Gemini API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ContentPart>,
}

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![ContentPart::Text {
                text: text.to_string(),
                thought: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ContentPart {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought: Option<bool>,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    /// Part kinds the studio never asks for (function calls, code, ...).
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<i32>,
    candidates_token_count: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}
