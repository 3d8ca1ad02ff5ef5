pub mod api_routes;
pub mod chat_routes;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::chat_service::ChatService;

use self::api_routes::list_files_handler;
use self::chat_routes::{chat_handler, chat_with_images_handler};

/// Image uploads make request bodies far larger than axum's 2 MB default.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

pub fn router(svc: ChatService) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/chat-with-images", post(chat_with_images_handler))
        .route("/api/list-files", get(list_files_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(svc)
}
