//! Credential gate handlers.

use axum::{extract::State, Extension, Json};
use service_core::error::AppError;

use crate::dtos::{LoginRequest, LoginResponse, MessageResponse};
use crate::services::workspace::WorkspaceUser;
use crate::startup::AppState;
use crate::utils::ValidatedJson;

/// Check the fixed credential pair and open a workspace.
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    state.gate.verify(&req.username, &req.password).await?;

    let token = state.workspaces.open();
    Ok(Json(LoginResponse::bearer(token)))
}

/// Revoke the caller's token and drop every session it owns.
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
) -> Result<Json<MessageResponse>, AppError> {
    state.workspaces.close(&user.token);
    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}
