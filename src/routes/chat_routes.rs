use axum::extract::{Multipart, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::attachments::{bind_attachments, parse_image_key};
use crate::errors::AppError;
use crate::models::{Attachment, ChatRequest, Message, ServerEvent, WireMessage};
use crate::routes::api_routes::error_response;
use crate::service::chat_service::{ChatService, PreparedTurn};

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST `/api/chat` — JSON body, used for the initial turn
pub async fn chat_handler(State(svc): State<ChatService>, Json(req): Json<ChatRequest>) -> Response {
    info!(
        "chat: project {} initial={} history={}",
        req.project_dir,
        req.is_initial,
        req.conversation_history.len()
    );
    let history = req.conversation_history.into_iter().map(Message::from).collect();
    match svc.prepare_turn(&req.project_dir, req.is_initial, history).await {
        Ok(turn) => stream_response(&svc, turn).await,
        Err(e) => error_response(&e),
    }
}

/// POST `/api/chat-with-images` — multipart body with history and `image_<m>_<i>` parts
pub async fn chat_with_images_handler(
    State(svc): State<ChatService>,
    multipart: Multipart,
) -> Response {
    let form = match read_form(multipart).await {
        Ok(form) => form,
        Err(e) => return error_response(&e),
    };
    info!(
        "chat-with-images: project {} initial={} history={} images={}",
        form.project_dir,
        form.is_initial,
        form.history.len(),
        form.images.len()
    );

    let history = bind_attachments(
        form.history.into_iter().map(Message::from).collect(),
        form.images,
    );
    match svc.prepare_turn(&form.project_dir, form.is_initial, history).await {
        Ok(turn) => stream_response(&svc, turn).await,
        Err(e) => error_response(&e),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ChatForm {
    project_dir: String,
    is_initial: bool,
    history: Vec<WireMessage>,
    images: Vec<(String, Attachment)>,
}

async fn read_form(mut multipart: Multipart) -> Result<ChatForm, AppError> {
    let mut form = ChatForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::invalid_request(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let read_err = |e: axum::extract::multipart::MultipartError| {
            AppError::invalid_request(format!("Failed to read field '{name}': {e}"))
        };

        match name.as_str() {
            "projectDir" => form.project_dir = field.text().await.map_err(read_err)?,
            "isInitial" => form.is_initial = field.text().await.map_err(read_err)? == "true",
            "conversationHistory" => {
                let raw = field.text().await.map_err(read_err)?;
                form.history = serde_json::from_str(&raw).map_err(|e| {
                    AppError::invalid_request(format!("Invalid conversationHistory: {e}"))
                })?;
            }
            key if parse_image_key(key).is_some() => {
                let file_name = field.file_name().unwrap_or(key).to_string();
                let media_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(read_err)?;
                form.images.push((name.clone(), Attachment::new(file_name, media_type, data)));
            }
            other => debug!("Ignoring form field '{other}'"),
        }
    }
    Ok(form)
}

async fn stream_response(svc: &ChatService, turn: PreparedTurn) -> Response {
    let events = match svc.stream_turn(turn).await {
        Ok(events) => events,
        Err(e) => {
            warn!("Upstream call failed: {e}");
            return error_response(&e);
        }
    };

    // An upstream error aborts the body, so the client sees a broken transfer
    // rather than a stream that merely ended.
    let sse_events = events.map(|event: Result<ServerEvent, AppError>| {
        event.map(|event| {
            Event::default()
                .data(serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string()))
        })
    });
    Sse::new(sse_events).keep_alive(KeepAlive::default()).into_response()
}
