use std::sync::Arc;

use tracing::info;

use project_chat::agent::OllamaInvoker;
use project_chat::config::AppConfig;
use project_chat::project::FsProjectSource;
use project_chat::routes::router;
use project_chat::service::chat_service::ChatService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "project_chat=debug,tower_http=debug".into()),
        )
        .init();

    let config = AppConfig::from_env();
    info!(
        "Using model {} at {}, projects under {}",
        config.upstream.model,
        config.upstream.base_url,
        config.projects_root.display()
    );

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let source = Arc::new(FsProjectSource::new(config.projects_root.clone()));
    let invoker = Arc::new(OllamaInvoker::new());
    let chat_service = ChatService::new(source, invoker, config.upstream.clone());

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, router(chat_service)).await?;
    Ok(())
}
