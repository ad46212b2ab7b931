//! Request and response bodies for the HTTP surface.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::dialogue::DialogueTurn;
use crate::models::edit::EditSession;
use crate::models::image::{AspectRatio, ImageBlob};
use crate::services::image_edit::download_name;

// ============================================================================
// Auth
// ============================================================================

/// Lengths are capped but not floored: an empty field is just a wrong
/// credential.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(max = 256, message = "Username is too long"))]
    pub username: String,

    #[validate(length(max = 256, message = "Password is too long"))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
}

impl LoginResponse {
    pub fn bearer(token: String) -> Self {
        Self {
            token,
            token_type: "Bearer".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// Chat
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatSessionResponse {
    pub id: Uuid,
    pub turns: Vec<DialogueTurn>,
    pub quick_actions: Vec<String>,
    pub is_streaming: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(max = 32000, message = "Message is too long"))]
    pub text: String,
}

// ============================================================================
// Image edit
// ============================================================================

/// Client view of an edit session. Images are data-URLs.
#[derive(Debug, Serialize, Deserialize)]
pub struct EditSessionResponse {
    pub id: Uuid,
    pub source_images: Vec<ImageBlob>,
    pub result_image: Option<ImageBlob>,
    pub instruction: String,
    pub aspect_ratio: AspectRatio,
    pub is_busy: bool,
    pub last_error: Option<String>,
    /// Suggested file name for the result, when there is one.
    pub download_name: Option<String>,
}

impl EditSessionResponse {
    pub fn new(id: Uuid, session: &EditSession) -> Self {
        Self {
            id,
            source_images: session.source_images().to_vec(),
            result_image: session.result_image().cloned(),
            instruction: session.instruction().to_string(),
            aspect_ratio: session.aspect_ratio(),
            is_busy: session.is_busy(),
            last_error: session.last_error().map(str::to_string),
            download_name: session
                .result_image()
                .map(|_| download_name(session.source_images().len()).to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateEditRequest {
    #[validate(length(max = 4000, message = "Instruction is too long"))]
    pub instruction: Option<String>,

    /// One of `16:9`, `9:16`, `1:1`, `4:3`, `3:4`.
    pub aspect_ratio: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddImagesRequest {
    /// `data:<mime>;base64,<payload>` strings, in order.
    #[validate(length(max = 64, message = "Too many images in one request"))]
    pub images: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddImagesResponse {
    pub added: usize,
    pub session: EditSessionResponse,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefineRequest {
    #[validate(length(max = 4000, message = "Instruction is too long"))]
    pub instruction: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::edit::EditLimits;

    #[test]
    fn session_view_serializes_images_as_data_urls() {
        let mut session = EditSession::new();
        session
            .add_images(
                vec![ImageBlob::new("image/png", vec![0, 1, 2])],
                &EditLimits::default(),
            )
            .unwrap();

        let view = EditSessionResponse::new(Uuid::nil(), &session);
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["source_images"][0], "data:image/png;base64,AAEC");
        assert_eq!(json["aspect_ratio"], "1:1");
        assert!(json["result_image"].is_null());
        assert!(json["download_name"].is_null());
    }

    #[test]
    fn overlong_login_fields_fail_validation() {
        let request = LoginRequest {
            username: "k".repeat(257),
            password: String::new(),
        };
        assert!(request.validate().is_err());
    }
}
