//! Multi-image edit requests.
//!
//! [`build_edit_request`] assembles the single provider request,
//! [`extract_single_image`] decides whether the answer is usable, and
//! [`ImageEditor`] runs both against an [`EditSession`] without holding its
//! lock across the provider call.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::error::{BlockReason, EditError, UnexpectedResponse, ValidationError};
use crate::models::edit::{EditLimits, EditSession, GenerationJob, GenerationKind};
use crate::models::image::{AspectRatio, ImageBlob};
use crate::services::metrics;
use crate::services::providers::{
    ImageProvider, ImageRequest, ImageResponse, RequestPart, ResponsePart,
};

/// Longest text excerpt quoted back when the model answers with words.
const TEXT_EXCERPT_CHARS: usize = 100;

/// Wrap the user's instruction in the image-only directive.
pub fn instruction_prompt(instruction: &str) -> String {
    format!(
        "Perform the following image generation/edit: \"{}\".\n\nIMPORTANT: You must ONLY return the edited/generated image. Do not provide any text explanation. If the request is to mix images, blend their concepts.",
        instruction
    )
}

/// One text part with the wrapped instruction, then every image in input
/// order.
pub fn build_edit_request(
    images: &[ImageBlob],
    instruction: &str,
    aspect_ratio: AspectRatio,
    limits: &EditLimits,
) -> Result<ImageRequest, ValidationError> {
    if images.is_empty() {
        return Err(ValidationError::NoImages);
    }
    if images.len() > limits.max_images {
        return Err(ValidationError::TooManyImages {
            max: limits.max_images,
        });
    }
    if images.iter().any(|img| img.len() > limits.max_image_bytes) {
        return Err(ValidationError::FileTooLarge {
            limit_mb: limits.max_image_bytes / (1024 * 1024),
        });
    }
    if instruction.trim().is_empty() {
        return Err(ValidationError::EmptyInstruction);
    }

    let mut parts = Vec::with_capacity(images.len() + 1);
    parts.push(RequestPart::Text(instruction_prompt(instruction)));
    parts.extend(images.iter().cloned().map(RequestPart::Image));

    Ok(ImageRequest {
        parts,
        aspect_ratio,
    })
}

/// Exactly one image out of a provider answer, or the reason there is none.
pub fn extract_single_image(response: ImageResponse) -> Result<ImageBlob, EditError> {
    if let Some(reason) = response
        .finish_reason
        .as_deref()
        .and_then(BlockReason::from_finish_reason)
    {
        return Err(EditError::ContentBlock(reason));
    }

    if response.parts.is_empty() {
        if let Some(reason) = response.prompt_block_reason {
            return Err(EditError::ContentBlock(BlockReason::Prompt(reason)));
        }
        return Err(UnexpectedResponse::Empty.into());
    }

    let mut first_text = None;
    for part in response.parts {
        match part {
            ResponsePart::Image(image) => return Ok(image),
            ResponsePart::Text(text) if first_text.is_none() && !text.is_empty() => {
                first_text = Some(text);
            }
            ResponsePart::Text(_) => {}
        }
    }

    match first_text {
        Some(text) => Err(UnexpectedResponse::Text(
            text.chars().take(TEXT_EXCERPT_CHARS).collect(),
        )
        .into()),
        None => Err(UnexpectedResponse::NoImage.into()),
    }
}

/// Runs edit requests for sessions.
pub struct ImageEditor {
    provider: Arc<dyn ImageProvider>,
    limits: EditLimits,
}

impl ImageEditor {
    pub fn new(provider: Arc<dyn ImageProvider>, limits: EditLimits) -> Self {
        Self { provider, limits }
    }

    pub fn limits(&self) -> &EditLimits {
        &self.limits
    }

    /// Send one edit request and return its single image.
    pub async fn edit(
        &self,
        images: &[ImageBlob],
        instruction: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<ImageBlob, EditError> {
        self.send(images, instruction, aspect_ratio, &self.limits)
            .await
    }

    async fn send(
        &self,
        images: &[ImageBlob],
        instruction: &str,
        aspect_ratio: AspectRatio,
        limits: &EditLimits,
    ) -> Result<ImageBlob, EditError> {
        let request = build_edit_request(images, instruction, aspect_ratio, limits)?;
        let model = self.provider.model().to_string();

        let start = Instant::now();
        let response = self.provider.generate(&request).await.map_err(|e| {
            tracing::warn!(error = %e, model = %model, "Image provider call failed");
            metrics::record_provider_error("image", e.kind());
            EditError::from(e)
        })?;
        metrics::record_provider_latency("image", &model, start.elapsed().as_secs_f64());
        metrics::record_tokens(&model, response.input_tokens, response.output_tokens);

        extract_single_image(response)
    }

    /// Generate from the session's images and instruction.
    pub async fn generate(&self, session: &Mutex<EditSession>) -> Result<ImageBlob, EditError> {
        let job = session.lock().await.begin_generate()?;
        self.run(session, job).await
    }

    /// Refine the session's last result with `instruction`.
    pub async fn refine(
        &self,
        session: &Mutex<EditSession>,
        instruction: &str,
    ) -> Result<ImageBlob, EditError> {
        let job = session.lock().await.begin_refine(instruction)?;
        self.run(session, job).await
    }

    async fn run(
        &self,
        session: &Mutex<EditSession>,
        job: GenerationJob,
    ) -> Result<ImageBlob, EditError> {
        tracing::info!(
            kind = job.kind.as_str(),
            images = job.images.len(),
            aspect_ratio = %job.aspect_ratio,
            "Starting image edit"
        );

        // The upload size limit applies to user files, not to a prior result.
        let limits = match job.kind {
            GenerationKind::Generate => self.limits,
            GenerationKind::Refine => EditLimits {
                max_image_bytes: usize::MAX,
                ..self.limits
            },
        };

        let outcome = self
            .send(&job.images, &job.instruction, job.aspect_ratio, &limits)
            .await;

        match &outcome {
            Ok(image) => {
                tracing::info!(
                    kind = job.kind.as_str(),
                    mime_type = image.mime_type(),
                    bytes = image.len(),
                    "Image edit succeeded"
                );
                metrics::record_image_edit(job.kind.as_str(), "success");
            }
            Err(e) => {
                tracing::warn!(kind = job.kind.as_str(), error = %e, "Image edit failed");
                metrics::record_image_edit(job.kind.as_str(), e.kind());
            }
        }

        session.lock().await.complete(&job, &outcome);
        outcome
    }
}

/// File name offered when the result is downloaded.
pub fn download_name(source_count: usize) -> &'static str {
    if source_count > 1 {
        "kalky-ai-mix.png"
    } else {
        "kalky-ai-edit.png"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::mock::MockImageProvider;
    use crate::services::providers::ProviderError;
    use std::time::Duration;

    fn image(tag: u8) -> ImageBlob {
        ImageBlob::new(if tag % 2 == 0 { "image/png" } else { "image/jpeg" }, vec![tag; 8])
    }

    fn response(parts: Vec<ResponsePart>, finish_reason: &str) -> ImageResponse {
        ImageResponse {
            parts,
            finish_reason: Some(finish_reason.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn request_has_instruction_then_images_in_order() {
        let images = vec![image(1), image(2), image(3)];
        let request = build_edit_request(
            &images,
            "put them on a beach",
            AspectRatio::Portrait,
            &EditLimits::default(),
        )
        .unwrap();

        assert_eq!(request.aspect_ratio, AspectRatio::Portrait);
        assert_eq!(request.parts.len(), 4);
        match &request.parts[0] {
            RequestPart::Text(text) => {
                assert!(text.contains("\"put them on a beach\""));
                assert!(text.contains("ONLY return the edited/generated image"));
            }
            other => panic!("expected text part, got {:?}", other),
        }
        let sent: Vec<&ImageBlob> = request.parts[1..]
            .iter()
            .map(|part| match part {
                RequestPart::Image(img) => img,
                other => panic!("expected image part, got {:?}", other),
            })
            .collect();
        assert_eq!(sent, images.iter().collect::<Vec<_>>());
    }

    #[test]
    fn request_validation() {
        let limits = EditLimits::default();
        assert_eq!(
            build_edit_request(&[], "x", AspectRatio::Square, &limits),
            Err(ValidationError::NoImages)
        );
        let eleven: Vec<ImageBlob> = (0..11).map(image).collect();
        assert_eq!(
            build_edit_request(&eleven, "x", AspectRatio::Square, &limits),
            Err(ValidationError::TooManyImages { max: 10 })
        );
        let big = ImageBlob::new("image/png", vec![0; limits.max_image_bytes + 1]);
        assert_eq!(
            build_edit_request(&[big], "x", AspectRatio::Square, &limits),
            Err(ValidationError::FileTooLarge { limit_mb: 5 })
        );
        assert_eq!(
            build_edit_request(&[image(1)], "  ", AspectRatio::Square, &limits),
            Err(ValidationError::EmptyInstruction)
        );
    }

    #[test]
    fn first_image_wins_even_with_several() {
        let result = extract_single_image(response(
            vec![
                ResponsePart::Text("Sure!".into()),
                ResponsePart::Image(image(4)),
                ResponsePart::Image(image(6)),
            ],
            "STOP",
        ))
        .unwrap();
        assert_eq!(result, image(4));
    }

    #[test]
    fn blocked_finish_reasons_are_typed() {
        let err = extract_single_image(response(vec![ResponsePart::Image(image(2))], "SAFETY"))
            .unwrap_err();
        assert!(matches!(err, EditError::ContentBlock(BlockReason::Safety)));

        let err = extract_single_image(response(vec![], "RECITATION")).unwrap_err();
        assert!(matches!(err, EditError::ContentBlock(BlockReason::Recitation)));

        let err = extract_single_image(response(vec![], "OTHER")).unwrap_err();
        assert_eq!(err.to_string(), "Generation stopped due to: OTHER");
    }

    #[test]
    fn text_only_answer_is_unexpected() {
        let long = "I cannot edit this image because ".repeat(10);
        let err = extract_single_image(response(vec![ResponsePart::Text(long.clone())], "STOP"))
            .unwrap_err();
        match err {
            EditError::UnexpectedResponse(UnexpectedResponse::Text(excerpt)) => {
                assert_eq!(excerpt.chars().count(), 100);
                assert!(long.starts_with(&excerpt));
            }
            other => panic!("expected text response error, got {:?}", other),
        }
    }

    #[test]
    fn empty_answers() {
        let err = extract_single_image(response(vec![], "STOP")).unwrap_err();
        assert!(matches!(
            err,
            EditError::UnexpectedResponse(UnexpectedResponse::Empty)
        ));

        let err = extract_single_image(ImageResponse {
            prompt_block_reason: Some("SAFETY".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, EditError::ContentBlock(BlockReason::Prompt(_))));
    }

    #[tokio::test]
    async fn generate_sends_session_images_and_stores_result() {
        let provider = MockImageProvider::new(true);
        let editor = ImageEditor::new(Arc::new(provider.clone()), EditLimits::default());
        let session = Mutex::new(EditSession::new());
        {
            let mut s = session.lock().await;
            s.add_images(vec![image(1), image(2)], editor.limits()).unwrap();
            s.set_instruction("swap the colours");
            s.set_aspect_ratio(AspectRatio::Standard);
        }

        let result = editor.generate(&session).await.unwrap();

        let s = session.lock().await;
        assert_eq!(s.result_image(), Some(&result));
        assert!(!s.is_busy());

        let requests = provider.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].parts.len(), 3);
        assert_eq!(requests[0].aspect_ratio, AspectRatio::Standard);
    }

    #[tokio::test]
    async fn refine_sends_only_previous_result() {
        let provider = MockImageProvider::new(true);
        let editor = ImageEditor::new(Arc::new(provider.clone()), EditLimits::default());
        let session = Mutex::new(EditSession::new());
        {
            let mut s = session.lock().await;
            s.add_images(vec![image(1), image(3), image(5)], editor.limits())
                .unwrap();
            s.set_instruction("blend");
        }
        let first = editor.generate(&session).await.unwrap();

        editor.refine(&session, "add snow").await.unwrap();

        let requests = provider.requests().await;
        assert_eq!(requests[1].parts.len(), 2);
        assert_eq!(requests[1].parts[1], RequestPart::Image(first.clone()));

        let s = session.lock().await;
        assert_eq!(s.source_images(), &[first]);
        assert_eq!(s.instruction(), "");
    }

    #[tokio::test]
    async fn provider_failure_lands_as_session_error() {
        let provider =
            MockImageProvider::new(true).with_error(ProviderError::InvalidRequest("400".into()));
        let editor = ImageEditor::new(Arc::new(provider), EditLimits::default());
        let session = Mutex::new(EditSession::new());
        {
            let mut s = session.lock().await;
            s.add_images(vec![image(1)], editor.limits()).unwrap();
            s.set_instruction("make it art");
        }

        let err = editor.generate(&session).await.unwrap_err();
        assert!(matches!(err, EditError::Transport(_)));

        let s = session.lock().await;
        assert!(!s.is_busy());
        assert_eq!(
            s.last_error(),
            Some("The request is invalid. Try a simpler prompt.")
        );
    }

    #[tokio::test]
    async fn concurrent_generate_is_refused() {
        let provider = MockImageProvider::new(true).with_delay(Duration::from_millis(50));
        let editor = Arc::new(ImageEditor::new(Arc::new(provider.clone()), EditLimits::default()));
        let session = Arc::new(Mutex::new(EditSession::new()));
        {
            let mut s = session.lock().await;
            s.add_images(vec![image(1)], editor.limits()).unwrap();
            s.set_instruction("again");
        }

        let first = {
            let editor = Arc::clone(&editor);
            let session = Arc::clone(&session);
            tokio::spawn(async move { editor.generate(&session).await })
        };
        while !session.lock().await.is_busy() {
            tokio::task::yield_now().await;
        }

        assert!(matches!(editor.generate(&session).await, Err(EditError::Busy)));
        assert!(first.await.unwrap().is_ok());
        assert_eq!(provider.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn refine_accepts_a_result_larger_than_the_upload_limit() {
        let provider = MockImageProvider::new(true)
            .with_response(response(
                vec![ResponsePart::Image(ImageBlob::new("image/png", vec![7; 64]))],
                "STOP",
            ));
        let limits = EditLimits {
            max_images: 10,
            max_image_bytes: 16,
        };
        let editor = ImageEditor::new(Arc::new(provider.clone()), limits);
        let session = Mutex::new(EditSession::new());
        {
            let mut s = session.lock().await;
            s.add_images(vec![image(1)], editor.limits()).unwrap();
            s.set_instruction("make it big");
        }

        editor.generate(&session).await.unwrap();
        assert!(editor.refine(&session, "sharper").await.is_ok());

        let s = session.lock().await;
        assert_eq!(s.source_images().len(), 1);
        assert_eq!(s.source_images()[0].len(), 64);
        assert_eq!(s.last_error(), None);
        assert_eq!(provider.requests().await.len(), 2);
    }

    #[test]
    fn download_names() {
        assert_eq!(download_name(1), "kalky-ai-edit.png");
        assert_eq!(download_name(3), "kalky-ai-mix.png");
    }
}
