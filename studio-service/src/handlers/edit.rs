//! Image edit session handlers.

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dtos::{
    AddImagesRequest, AddImagesResponse, EditSessionResponse, RefineRequest, UpdateEditRequest,
};
use crate::error::{EditError, ValidationError};
use crate::models::edit::{EditSession, GenerationKind};
use crate::models::image::{is_image_mime, AspectRatio, ImageBlob};
use crate::services::image_edit::download_name;
use crate::services::workspace::WorkspaceUser;
use crate::startup::AppState;
use crate::utils::ValidatedJson;

pub async fn create_session(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
) -> (StatusCode, Json<EditSessionResponse>) {
    let (id, session) = state.workspaces.insert_edit(&user);
    tracing::info!(session_id = %id, "Edit session opened");

    let view = EditSessionResponse::new(id, &*session.lock().await);
    (StatusCode::CREATED, Json(view))
}

pub async fn get_session(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<EditSessionResponse>, AppError> {
    let session = state.workspaces.edit(&user, id)?;
    let view = EditSessionResponse::new(id, &*session.lock().await);
    Ok(Json(view))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.workspaces.remove_edit(&user, id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Change the instruction and/or the aspect ratio.
pub async fn update_session(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateEditRequest>,
) -> Result<Json<EditSessionResponse>, AppError> {
    let aspect_ratio = req
        .aspect_ratio
        .as_deref()
        .map(str::parse::<AspectRatio>)
        .transpose()?;

    let session = state.workspaces.edit(&user, id)?;
    let mut session = session.lock().await;
    if let Some(instruction) = req.instruction {
        session.set_instruction(instruction);
    }
    if let Some(aspect_ratio) = aspect_ratio {
        session.set_aspect_ratio(aspect_ratio);
    }

    Ok(Json(EditSessionResponse::new(id, &session)))
}

/// Add data-URL images.
pub async fn add_images(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<AddImagesRequest>,
) -> Result<Json<AddImagesResponse>, AppError> {
    let session = state.workspaces.edit(&user, id)?;

    let images = match req
        .images
        .iter()
        .map(|url| ImageBlob::from_data_url(url))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(images) => images,
        Err(e) => return Err(session.lock().await.reject(e).into()),
    };

    store_images(&state, id, &session, images).await
}

/// Add images from multipart file fields.
pub async fn upload_images(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<AddImagesResponse>, AppError> {
    let session = state.workspaces.edit(&user, id)?;
    let mut images = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid multipart body: {}", e)))?
    {
        let file_name = field.file_name().unwrap_or("unnamed").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        if !is_image_mime(&content_type) {
            let err = ValidationError::UnsupportedMediaType(content_type);
            return Err(session.lock().await.reject(err).into());
        }

        let data = field.bytes().await.map_err(|e| {
            tracing::error!("Failed to read file {}: {}", file_name, e);
            AppError::BadRequest(anyhow::anyhow!("{}: Failed to read file", file_name))
        })?;

        images.push(ImageBlob::new(content_type, data.to_vec()));
    }

    store_images(&state, id, &session, images).await
}

async fn store_images(
    state: &AppState,
    id: Uuid,
    session: &Mutex<EditSession>,
    images: Vec<ImageBlob>,
) -> Result<Json<AddImagesResponse>, AppError> {
    let mut session = session.lock().await;

    let added = session.add_images(images, state.editor.limits())?;
    tracing::info!(
        session_id = %id,
        added,
        total = session.source_images().len(),
        "Images added"
    );

    Ok(Json(AddImagesResponse {
        added,
        session: EditSessionResponse::new(id, &session),
    }))
}

pub async fn remove_image(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
    Path((id, index)): Path<(Uuid, usize)>,
) -> Result<Json<EditSessionResponse>, AppError> {
    let session = state.workspaces.edit(&user, id)?;
    let mut session = session.lock().await;
    session.remove_image(index)?;

    Ok(Json(EditSessionResponse::new(id, &session)))
}

/// Run the edit with the session's images, instruction and aspect ratio.
pub async fn generate(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<EditSessionResponse>, AppError> {
    let session = state.workspaces.edit(&user, id)?;
    let editor = Arc::clone(&state.editor);

    let outcome = {
        let session = Arc::clone(&session);
        run_detached(async move { editor.generate(&session).await }).await?
    };
    outcome.map_err(|e| generation_error(e, GenerationKind::Generate))?;

    let view = EditSessionResponse::new(id, &*session.lock().await);
    Ok(Json(view))
}

/// Feed the last result back with a new instruction.
pub async fn refine(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<RefineRequest>,
) -> Result<Json<EditSessionResponse>, AppError> {
    let session = state.workspaces.edit(&user, id)?;
    let editor = Arc::clone(&state.editor);

    let outcome = {
        let session = Arc::clone(&session);
        run_detached(async move { editor.refine(&session, &req.instruction).await }).await?
    };
    outcome.map_err(|e| generation_error(e, GenerationKind::Refine))?;

    let view = EditSessionResponse::new(id, &*session.lock().await);
    Ok(Json(view))
}

pub async fn reset(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<EditSessionResponse>, AppError> {
    let session = state.workspaces.edit(&user, id)?;
    let mut session = session.lock().await;
    session.reset()?;

    Ok(Json(EditSessionResponse::new(id, &session)))
}

/// The result image as a file download.
pub async fn download_result(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let session = state.workspaces.edit(&user, id)?;
    let session = session.lock().await;

    let image = session
        .result_image()
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("No generated image yet")))?;
    let file_name = download_name(session.source_images().len());

    Ok((
        [
            (header::CONTENT_TYPE, image.mime_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        image.bytes().to_vec(),
    )
        .into_response())
}

/// Spawn the provider round trip so it completes even if the client
/// disconnects.
async fn run_detached<F>(future: F) -> Result<F::Output, AppError>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future).await.map_err(|e| {
        tracing::error!(error = %e, "Image edit task failed");
        AppError::InternalError(anyhow::anyhow!("Image edit task failed: {}", e))
    })
}

fn generation_error(err: EditError, kind: GenerationKind) -> AppError {
    let message = err.user_message(kind);
    err.into_app_error(message)
}
