use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::errors::AppError;
use crate::service::chat_service::ChatService;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesQuery {
    #[serde(default)]
    pub project_dir: String,
}

/// GET `/api/list-files?projectDir=` — files in the project with their sizes
pub async fn list_files_handler(
    State(svc): State<ChatService>,
    Query(query): Query<ListFilesQuery>,
) -> Response {
    match svc.list_files(&query.project_dir).await {
        Ok(listing) => Json(listing).into_response(),
        Err(e) => error_response(&e),
    }
}

// ── Helper ────────────────────────────────────────────────────────────────────

pub fn error_status(err: &AppError) -> StatusCode {
    if err.is_validation() || err.is_configuration() {
        StatusCode::BAD_REQUEST
    } else if err.is_upstream_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

pub fn error_response(err: &AppError) -> Response {
    (error_status(err), Json(json!({ "error": err.to_string() }))).into_response()
}
