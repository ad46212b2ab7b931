use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::startup::AppState;

/// Liveness probe. Does not touch the providers.
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "studio-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Readiness probe: both providers must answer their health checks.
///
/// The route is public, so a failure only reports the error kind; the full
/// provider error goes to the log.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let (chat, image) = tokio::join!(
        state.chat_provider.health_check(),
        state.image_provider.health_check()
    );

    match chat.and(image) {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "chat_model": state.chat_provider.model(),
                "image_model": state.image_provider.model(),
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "error": e.kind()
                })),
            )
        }
    }
}
