//! Interactive terminal client for the chat server.
//!
//! Usage: `chat_client <projectDir>`. Each stdin line is sent as a message;
//! `/image <path>` queues an image for the next message. Ctrl-C interrupts
//! the reply currently streaming.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use project_chat::client::ChatSession;
use project_chat::config::server_url_from_env;
use project_chat::models::{Attachment, Role, Transcript};
use project_chat::stream::TurnOutcome;

fn media_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Prints whatever the streaming reply gained since the last call.
fn reply_printer() -> impl FnMut(&Transcript) {
    let mut printed = 0;
    move |t: &Transcript| {
        let Some(last) = t.last().filter(|m| m.role == Role::Assistant) else {
            return;
        };
        if last.content.len() < printed {
            printed = 0;
        }
        if let Some(new) = last.content.get(printed..) {
            print!("{new}");
            let _ = std::io::stdout().flush();
            printed = last.content.len();
        }
    }
}

/// Cancels `token` on Ctrl-C until the returned task is aborted.
fn cancel_on_ctrl_c(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    })
}

fn report(outcome: Result<TurnOutcome, project_chat::errors::AppError>) {
    match outcome {
        Ok(TurnOutcome::Cancelled) => println!("\n[interrupted]"),
        Ok(_) => println!(),
        Err(e) => eprintln!("\n[error] {e}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "project_chat=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let project_dir = std::env::args()
        .nth(1)
        .context("usage: chat_client <projectDir>")?;
    let mut session = ChatSession::new(server_url_from_env(), project_dir);

    let cancel = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(cancel.clone());
    let outcome = session.start(&cancel, reply_printer()).await;
    watcher.abort();
    report(outcome);

    let mut pending_images = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(path) = line.strip_prefix("/image ") {
            let path = Path::new(path.trim());
            match tokio::fs::read(path).await {
                Ok(data) => {
                    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                    pending_images.push(Attachment::new(name, media_type_for(path), Bytes::from(data)));
                    println!("[queued {}]", path.display());
                }
                Err(e) => eprintln!("[error] cannot read {}: {e}", path.display()),
            }
            continue;
        }

        let cancel = CancellationToken::new();
        let watcher = cancel_on_ctrl_c(cancel.clone());
        let images = std::mem::take(&mut pending_images);
        let outcome = session.send(&line, images, &cancel, reply_printer()).await;
        watcher.abort();
        report(outcome);
    }
    Ok(())
}
