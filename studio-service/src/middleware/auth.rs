use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::startup::AppState;

/// Require a live bearer token and expose the caller as
/// [`WorkspaceUser`](crate::services::workspace::WorkspaceUser).
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

    let user = state
        .workspaces
        .authenticate(token)
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid or revoked token")))?;

    // Store the caller in request extensions so handlers can access it
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}
