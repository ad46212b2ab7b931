//! Failure taxonomy for the studio flows and its mapping onto HTTP errors.

use service_core::error::AppError;
use std::fmt;
use thiserror::Error;

use crate::models::edit::GenerationKind;
use crate::services::providers::ProviderError;

const SAFETY_FILTER_MESSAGE: &str =
    "The request was blocked by safety filters. Please adjust your prompt.";

/// Input rejected before anything is sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("One or more files exceed the {limit_mb}MB limit.")]
    FileTooLarge { limit_mb: usize },

    #[error("You can only upload up to {max} images.")]
    TooManyImages { max: usize },

    #[error("Add at least one image before generating.")]
    NoImages,

    #[error("Describe the edit you want before generating.")]
    EmptyInstruction,

    #[error("There is no generated image to refine yet.")]
    NothingToRefine,

    #[error("Images must be sent as base64 data URLs.")]
    MalformedDataUrl,

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Unknown aspect ratio: {0}")]
    UnknownAspectRatio(String),

    #[error("No image at position {0}.")]
    NoSuchImage(usize),
}

/// Why the provider refused to finish a generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    Safety,
    Recitation,
    /// The prompt itself was blocked before any candidate was produced.
    Prompt(String),
    Other(String),
}

impl BlockReason {
    /// Map a Gemini `finishReason`; `None` means a normal stop.
    pub fn from_finish_reason(reason: &str) -> Option<Self> {
        match reason {
            "STOP" | "FINISH_REASON_UNSPECIFIED" => None,
            "SAFETY" | "IMAGE_SAFETY" | "PROHIBITED_CONTENT" => Some(BlockReason::Safety),
            "RECITATION" => Some(BlockReason::Recitation),
            other => Some(BlockReason::Other(other.to_string())),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            BlockReason::Safety => "safety",
            BlockReason::Recitation => "recitation",
            BlockReason::Prompt(_) => "prompt",
            BlockReason::Other(_) => "other",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Safety => f.write_str(
                "Safety Block: The model refused to generate the image based on safety guidelines. Please try a different prompt.",
            ),
            BlockReason::Recitation => f.write_str(
                "Recitation Block: The model flagged this content as a recitation of copyrighted material.",
            ),
            BlockReason::Prompt(reason) => write!(f, "The request was blocked: {}", reason),
            BlockReason::Other(reason) => write!(f, "Generation stopped due to: {}", reason),
        }
    }
}

/// The provider answered normally but without a usable image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnexpectedResponse {
    /// Text excerpt, at most 100 characters.
    #[error("The model responded with text instead of an image: \"{0}...\"")]
    Text(String),

    #[error("No content returned from Gemini. Please try again with a different image or prompt.")]
    Empty,

    #[error("No image data found in the response.")]
    NoImage,
}

#[derive(Debug, Clone, Error)]
pub enum EditError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] ProviderError),

    #[error("{0}")]
    ContentBlock(BlockReason),

    #[error(transparent)]
    UnexpectedResponse(#[from] UnexpectedResponse),

    #[error("A generation is already running for this session.")]
    Busy,
}

impl EditError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EditError::Validation(_) => "validation",
            EditError::Transport(_) => "transport",
            EditError::ContentBlock(_) => "content_block",
            EditError::UnexpectedResponse(_) => "unexpected_response",
            EditError::Busy => "busy",
        }
    }

    /// Message shown to the user once the session has returned to idle.
    pub fn user_message(&self, kind: GenerationKind) -> String {
        match self {
            EditError::Transport(provider) => match provider {
                ProviderError::InvalidRequest(_) => {
                    "The request is invalid. Try a simpler prompt.".to_string()
                }
                ProviderError::AccessDenied(_) => {
                    "Access denied. Please check your system configuration.".to_string()
                }
                ProviderError::ContentFiltered => SAFETY_FILTER_MESSAGE.to_string(),
                _ => kind.failure_message().to_string(),
            },
            other => other.to_string(),
        }
    }

    /// HTTP rendering carrying the user-facing message.
    pub fn into_app_error(self, message: String) -> AppError {
        match self {
            EditError::Validation(_) => AppError::BadRequest(anyhow::anyhow!(message)),
            EditError::Busy => AppError::Conflict(anyhow::anyhow!(message)),
            EditError::ContentBlock(_) | EditError::UnexpectedResponse(_) => {
                AppError::UnprocessableContent(message)
            }
            EditError::Transport(_) => AppError::BadGateway(message),
        }
    }
}

impl From<EditError> for AppError {
    fn from(err: EditError) -> Self {
        let message = err.to_string();
        err.into_app_error(message)
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::BadRequest(anyhow::anyhow!(err.to_string()))
    }
}

/// The credential gate's only failure. Deliberately says nothing about which
/// field was wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("Incorrect username or password.")]
    InvalidCredentials,
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        AppError::Unauthorized(anyhow::anyhow!(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn finish_reasons_map_to_blocks() {
        assert_eq!(BlockReason::from_finish_reason("STOP"), None);
        assert_eq!(
            BlockReason::from_finish_reason("SAFETY"),
            Some(BlockReason::Safety)
        );
        assert_eq!(
            BlockReason::from_finish_reason("RECITATION"),
            Some(BlockReason::Recitation)
        );
        assert_eq!(
            BlockReason::from_finish_reason("MAX_TOKENS"),
            Some(BlockReason::Other("MAX_TOKENS".into()))
        );
    }

    #[test]
    fn transport_messages_depend_on_operation() {
        let err = EditError::Transport(ProviderError::NetworkError("reset".into()));
        assert_eq!(
            err.user_message(GenerationKind::Generate),
            "Generation failed. Please try again."
        );
        assert_eq!(
            err.user_message(GenerationKind::Refine),
            "Refinement failed. Please try again."
        );

        let denied = EditError::Transport(ProviderError::AccessDenied("403".into()));
        assert_eq!(
            denied.user_message(GenerationKind::Generate),
            "Access denied. Please check your system configuration."
        );
    }

    #[test]
    fn blocks_surface_their_reason() {
        let err = EditError::ContentBlock(BlockReason::Other("OTHER".into()));
        assert_eq!(
            err.user_message(GenerationKind::Generate),
            "Generation stopped due to: OTHER"
        );
        assert_eq!(
            err.into_app_error("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn busy_is_a_conflict() {
        let app: AppError = EditError::Busy.into();
        assert_eq!(app.status_code(), StatusCode::CONFLICT);
        let app: AppError = EditError::Validation(ValidationError::NoImages).into();
        assert_eq!(app.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn gate_error_is_unauthorized() {
        let app: AppError = GateError::InvalidCredentials.into();
        assert_eq!(app.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(app.to_string(), "Unauthorized: Incorrect username or password.");
    }
}
