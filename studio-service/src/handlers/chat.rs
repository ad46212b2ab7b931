//! Chat session handlers. Replies stream back as server-sent events.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use futures::{Stream, StreamExt};
use serde_json::json;
use service_core::error::AppError;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::dtos::{ChatSessionResponse, SendMessageRequest};
use crate::services::chat::{ChatConversation, ChatEvent, QUICK_ACTIONS};
use crate::services::workspace::WorkspaceUser;
use crate::startup::AppState;
use crate::utils::ValidatedJson;

const EVENT_BUFFER: usize = 64;

async fn session_view(id: Uuid, conversation: &ChatConversation) -> ChatSessionResponse {
    ChatSessionResponse {
        id,
        turns: conversation.turns().await,
        quick_actions: QUICK_ACTIONS.iter().map(|s| s.to_string()).collect(),
        is_streaming: conversation.is_streaming(),
    }
}

pub async fn create_session(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
) -> (StatusCode, Json<ChatSessionResponse>) {
    let conversation = ChatConversation::open(state.chat_provider.as_ref());
    let (id, conversation) = state.workspaces.insert_chat(&user, conversation);
    tracing::info!(session_id = %id, "Chat session opened");

    (StatusCode::CREATED, Json(session_view(id, &conversation).await))
}

pub async fn get_session(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChatSessionResponse>, AppError> {
    let conversation = state.workspaces.chat(&user, id)?;
    Ok(Json(session_view(id, &conversation).await))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.workspaces.remove_chat(&user, id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Send a message and stream the reply.
///
/// The aggregation runs in its own task and finishes even if the client
/// goes away; the transcript then holds the final turn.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(user): Extension<WorkspaceUser>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let conversation = state.workspaces.chat(&user, id)?;
    if conversation.is_streaming() {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "A reply is already streaming for this session"
        )));
    }

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(async move {
        conversation.send(&req.text, Some(tx)).await;
    });

    let stream = ReceiverStream::new(rx).map(|event| Ok(to_sse_event(event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: ChatEvent) -> Event {
    let (name, data) = match event {
        ChatEvent::Started { user, model_id } => {
            ("started", json!({ "user": user, "model_id": model_id }))
        }
        ChatEvent::Delta(text) => ("delta", json!({ "text": text })),
        ChatEvent::Finished(turn) => ("done", json!(turn)),
        ChatEvent::Failed(turn) => ("failed", json!(turn)),
        ChatEvent::Ignored => ("ignored", json!({})),
    };

    Event::default()
        .event(name)
        .json_data(data)
        .unwrap_or_else(|_| Event::default().event(name).data("{}"))
}
