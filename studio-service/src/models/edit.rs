//! Image edit session state.
//!
//! An [`EditSession`] moves `Idle -> Busy` when a generation starts and back
//! to idle with either a result or an error. The busy flag is the only thing
//! serialising generations; there is no queue.

use serde::Serialize;

use crate::error::{EditError, ValidationError};
use crate::models::image::{AspectRatio, ImageBlob};

pub const DEFAULT_MAX_IMAGES: usize = 10;
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Generate,
    Refine,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Generate => "generate",
            GenerationKind::Refine => "refine",
        }
    }

    /// Fallback message when a failure carries nothing more specific.
    pub fn failure_message(&self) -> &'static str {
        match self {
            GenerationKind::Generate => "Generation failed. Please try again.",
            GenerationKind::Refine => "Refinement failed. Please try again.",
        }
    }
}

/// Upload limits checked before an image enters a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditLimits {
    pub max_images: usize,
    pub max_image_bytes: usize,
}

impl Default for EditLimits {
    fn default() -> Self {
        Self {
            max_images: DEFAULT_MAX_IMAGES,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

impl EditLimits {
    fn max_image_mb(&self) -> usize {
        self.max_image_bytes / (1024 * 1024)
    }
}

/// Snapshot of everything a single provider call needs. Taken when the
/// session turns busy so the session lock is not held during the call.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub kind: GenerationKind,
    pub images: Vec<ImageBlob>,
    pub instruction: String,
    pub aspect_ratio: AspectRatio,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EditSession {
    source_images: Vec<ImageBlob>,
    result_image: Option<ImageBlob>,
    instruction: String,
    aspect_ratio: AspectRatio,
    is_busy: bool,
    last_error: Option<String>,
}

impl EditSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source_images(&self) -> &[ImageBlob] {
        &self.source_images
    }

    pub fn result_image(&self) -> Option<&ImageBlob> {
        self.result_image.as_ref()
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn is_busy(&self) -> bool {
        self.is_busy
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Add images in order, up to the remaining capacity.
    ///
    /// A full session or any oversized image rejects the whole batch and
    /// leaves the images untouched. Returns how many images were added.
    pub fn add_images(
        &mut self,
        images: Vec<ImageBlob>,
        limits: &EditLimits,
    ) -> Result<usize, EditError> {
        if self.is_busy {
            return Err(EditError::Busy);
        }
        if images.is_empty() {
            return Ok(0);
        }

        let remaining = limits.max_images.saturating_sub(self.source_images.len());
        if remaining == 0 {
            return Err(self.reject(ValidationError::TooManyImages {
                max: limits.max_images,
            }));
        }

        let offered = images.len();
        let accepted: Vec<ImageBlob> = images.into_iter().take(remaining).collect();
        if offered > accepted.len() {
            tracing::warn!(
                offered,
                accepted = accepted.len(),
                "Upload truncated to remaining capacity"
            );
        }

        if accepted.iter().any(|img| img.len() > limits.max_image_bytes) {
            return Err(self.reject(ValidationError::FileTooLarge {
                limit_mb: limits.max_image_mb(),
            }));
        }

        let added = accepted.len();
        self.source_images.extend(accepted);
        self.result_image = None;
        self.last_error = None;
        Ok(added)
    }

    pub fn remove_image(&mut self, index: usize) -> Result<ImageBlob, EditError> {
        if self.is_busy {
            return Err(EditError::Busy);
        }
        if index >= self.source_images.len() {
            return Err(ValidationError::NoSuchImage(index).into());
        }
        self.result_image = None;
        Ok(self.source_images.remove(index))
    }

    pub fn set_instruction(&mut self, instruction: impl Into<String>) {
        self.instruction = instruction.into();
    }

    pub fn set_aspect_ratio(&mut self, aspect_ratio: AspectRatio) {
        self.aspect_ratio = aspect_ratio;
    }

    /// Back to the freshly created state.
    pub fn reset(&mut self) -> Result<(), EditError> {
        if self.is_busy {
            return Err(EditError::Busy);
        }
        *self = Self::default();
        Ok(())
    }

    /// Start a generation from the current images and instruction.
    pub fn begin_generate(&mut self) -> Result<GenerationJob, EditError> {
        if self.is_busy {
            return Err(EditError::Busy);
        }
        if self.source_images.is_empty() {
            return Err(self.reject(ValidationError::NoImages));
        }
        if self.instruction.trim().is_empty() {
            return Err(self.reject(ValidationError::EmptyInstruction));
        }

        self.is_busy = true;
        self.last_error = None;
        Ok(GenerationJob {
            kind: GenerationKind::Generate,
            images: self.source_images.clone(),
            instruction: self.instruction.clone(),
            aspect_ratio: self.aspect_ratio,
        })
    }

    /// Start a refinement that feeds the current result back as the only
    /// input image.
    pub fn begin_refine(&mut self, instruction: &str) -> Result<GenerationJob, EditError> {
        if self.is_busy {
            return Err(EditError::Busy);
        }
        let prior = match &self.result_image {
            Some(result) => result.clone(),
            None => return Err(self.reject(ValidationError::NothingToRefine)),
        };
        if instruction.trim().is_empty() {
            return Err(self.reject(ValidationError::EmptyInstruction));
        }

        self.is_busy = true;
        self.last_error = None;
        Ok(GenerationJob {
            kind: GenerationKind::Refine,
            images: vec![prior],
            instruction: instruction.to_string(),
            aspect_ratio: self.aspect_ratio,
        })
    }

    /// Land the outcome of `job` and return to idle.
    pub fn complete(&mut self, job: &GenerationJob, outcome: &Result<ImageBlob, EditError>) {
        self.is_busy = false;
        match outcome {
            Ok(image) => {
                if job.kind == GenerationKind::Refine {
                    self.source_images = job.images.clone();
                    self.instruction.clear();
                }
                self.result_image = Some(image.clone());
                self.last_error = None;
            }
            Err(err) => {
                self.last_error = Some(err.user_message(job.kind));
            }
        }
    }

    /// Record `err` as the session's last error and hand it back.
    pub fn reject(&mut self, err: ValidationError) -> EditError {
        self.last_error = Some(err.to_string());
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::ProviderError;

    fn image(tag: u8) -> ImageBlob {
        ImageBlob::new("image/png", vec![tag; 16])
    }

    fn session_with(count: usize) -> EditSession {
        let mut session = EditSession::new();
        let images = (0..count).map(|i| image(i as u8)).collect();
        session.add_images(images, &EditLimits::default()).unwrap();
        session
    }

    #[test]
    fn eleventh_image_is_rejected_without_change() {
        let mut session = session_with(10);
        let before = session.source_images().to_vec();

        let err = session
            .add_images(vec![image(99)], &EditLimits::default())
            .unwrap_err();

        assert!(matches!(
            err,
            EditError::Validation(ValidationError::TooManyImages { max: 10 })
        ));
        assert_eq!(session.source_images(), before.as_slice());
        assert_eq!(
            session.last_error(),
            Some("You can only upload up to 10 images.")
        );
    }

    #[test]
    fn oversized_image_leaves_images_unchanged() {
        let mut session = session_with(2);
        let limits = EditLimits::default();
        let big = ImageBlob::new("image/png", vec![0; limits.max_image_bytes + 1]);

        let err = session.add_images(vec![image(7), big], &limits).unwrap_err();

        assert!(matches!(
            err,
            EditError::Validation(ValidationError::FileTooLarge { limit_mb: 5 })
        ));
        assert_eq!(session.source_images().len(), 2);
        assert_eq!(
            session.last_error(),
            Some("One or more files exceed the 5MB limit.")
        );
    }

    #[test]
    fn batches_are_truncated_to_capacity() {
        let mut session = session_with(8);
        let added = session
            .add_images(vec![image(1), image(2), image(3)], &EditLimits::default())
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(session.source_images().len(), 10);
    }

    #[test]
    fn changing_images_clears_result() {
        let mut session = session_with(1);
        session.set_instruction("make it blue");
        let job = session.begin_generate().unwrap();
        session.complete(&job, &Ok(image(42)));
        assert!(session.result_image().is_some());

        session.remove_image(0).unwrap();
        assert!(session.result_image().is_none());
    }

    #[test]
    fn generate_requires_images_and_instruction() {
        let mut session = EditSession::new();
        assert!(matches!(
            session.begin_generate(),
            Err(EditError::Validation(ValidationError::NoImages))
        ));

        let mut session = session_with(1);
        session.set_instruction("   ");
        assert!(matches!(
            session.begin_generate(),
            Err(EditError::Validation(ValidationError::EmptyInstruction))
        ));
        assert!(!session.is_busy());
    }

    #[test]
    fn busy_session_refuses_second_generation() {
        let mut session = session_with(1);
        session.set_instruction("add a hat");
        let _job = session.begin_generate().unwrap();
        assert!(session.is_busy());
        assert!(matches!(session.begin_generate(), Err(EditError::Busy)));
        assert!(matches!(
            session.add_images(vec![image(3)], &EditLimits::default()),
            Err(EditError::Busy)
        ));
    }

    #[test]
    fn failure_returns_to_idle_with_message() {
        let mut session = session_with(1);
        session.set_instruction("add a hat");
        let job = session.begin_generate().unwrap();
        session.complete(
            &job,
            &Err(EditError::Transport(ProviderError::NetworkError(
                "timeout".into(),
            ))),
        );

        assert!(!session.is_busy());
        assert!(session.result_image().is_none());
        assert_eq!(
            session.last_error(),
            Some("Generation failed. Please try again.")
        );
    }

    #[test]
    fn successful_refine_promotes_previous_result() {
        let mut session = session_with(3);
        session.set_instruction("blend them");
        let job = session.begin_generate().unwrap();
        let first = image(50);
        session.complete(&job, &Ok(first.clone()));

        let job = session.begin_refine("now at night").unwrap();
        assert_eq!(job.images, vec![first.clone()]);
        let second = image(51);
        session.complete(&job, &Ok(second.clone()));

        assert_eq!(session.source_images(), &[first]);
        assert_eq!(session.result_image(), Some(&second));
        assert_eq!(session.instruction(), "");
    }

    #[test]
    fn failed_refine_keeps_sources() {
        let mut session = session_with(2);
        session.set_instruction("blend");
        let job = session.begin_generate().unwrap();
        session.complete(&job, &Ok(image(9)));

        let job = session.begin_refine("brighter").unwrap();
        session.complete(
            &job,
            &Err(EditError::Transport(ProviderError::NetworkError(
                "reset".into(),
            ))),
        );

        assert_eq!(session.source_images().len(), 2);
        assert_eq!(session.instruction(), "blend");
        assert_eq!(
            session.last_error(),
            Some("Refinement failed. Please try again.")
        );
    }

    #[test]
    fn refine_needs_a_result() {
        let mut session = session_with(1);
        assert!(matches!(
            session.begin_refine("again"),
            Err(EditError::Validation(ValidationError::NothingToRefine))
        ));
    }

    #[test]
    fn reset_restores_defaults() {
        let mut session = session_with(4);
        session.set_instruction("x");
        session.set_aspect_ratio(AspectRatio::Landscape);
        session.reset().unwrap();

        assert!(session.source_images().is_empty());
        assert_eq!(session.instruction(), "");
        assert_eq!(session.aspect_ratio(), AspectRatio::Square);
    }
}
