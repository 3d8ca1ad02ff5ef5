//! Client side of a chat session: posts turns to the server and folds the
//! streamed reply into the session transcript.

use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attachments::keyed_parts;
use crate::errors::AppError;
use crate::models::{Attachment, Message, Transcript};
use crate::stream::{Reconciler, TurnOutcome, decode_stream};

/// One conversation against a chat server. Taking `&mut self` for every turn
/// means a session can only have one reply in flight.
pub struct ChatSession {
    http: reqwest::Client,
    base_url: String,
    project_dir: String,
    transcript: Transcript,
}

impl ChatSession {
    pub fn new(base_url: impl Into<String>, project_dir: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_dir: project_dir.into(),
            transcript: Transcript::new(),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Runs the initial turn: the server sends only the project context upstream.
    pub async fn start<F>(
        &mut self,
        cancel: &CancellationToken,
        observer: F,
    ) -> Result<TurnOutcome, AppError>
    where
        F: FnMut(&Transcript),
    {
        let request = self.http.post(format!("{}/api/chat", self.base_url)).json(&json!({
            "projectDir": self.project_dir,
            "isInitial": true,
            "conversationHistory": [],
        }));
        self.run_turn(request, cancel, observer).await
    }

    /// Appends a user message and runs a follow-up turn. The whole history is
    /// sent along with every image accumulated so far.
    pub async fn send<F>(
        &mut self,
        text: &str,
        images: Vec<Attachment>,
        cancel: &CancellationToken,
        observer: F,
    ) -> Result<TurnOutcome, AppError>
    where
        F: FnMut(&Transcript),
    {
        if text.trim().is_empty() && images.is_empty() {
            return Err(AppError::EmptyField { field_name: "message".to_string() });
        }
        self.transcript.push(Message::user(text).with_images(images));

        let history = serde_json::to_string(&self.transcript.to_wire())
            .map_err(|e| AppError::Unexpected(format!("Failed to encode history: {e}")))?;
        let mut form = Form::new()
            .text("projectDir", self.project_dir.clone())
            .text("isInitial", "false")
            .text("conversationHistory", history);
        for (key, attachment) in keyed_parts(self.transcript.messages()) {
            form = form.part(key, image_part(attachment));
        }

        let request = self
            .http
            .post(format!("{}/api/chat-with-images", self.base_url))
            .multipart(form);
        self.run_turn(request, cancel, observer).await
    }

    async fn run_turn<F>(
        &mut self,
        request: RequestBuilder,
        cancel: &CancellationToken,
        observer: F,
    ) -> Result<TurnOutcome, AppError>
    where
        F: FnMut(&Transcript),
    {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Turn cancelled before the server responded");
                return Ok(TurnOutcome::Cancelled);
            }
            response = request.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Turn cancelled while reading the error response");
                    return Ok(TurnOutcome::Cancelled);
                }
                body = response.text() => body.unwrap_or_default(),
            };
            warn!("Chat server returned {status}: {body}");
            return Err(status_error(status, &body));
        }

        let before = self.transcript.messages().to_vec();
        let events = decode_stream(response.bytes_stream());
        let outcome = Reconciler::new(&mut self.transcript)
            .run(events, cancel, observer)
            .await?;
        if outcome == TurnOutcome::Replaced {
            self.transcript.restore_images(&before);
        }
        debug!("Turn finished: {outcome:?}, {} messages", self.transcript.len());
        Ok(outcome)
    }
}

fn image_part(attachment: Attachment) -> Part {
    let Attachment { file_name, media_type, data } = attachment;
    let part = Part::bytes(data.to_vec()).file_name(file_name.clone());
    match part.mime_str(&media_type) {
        Ok(part) => part,
        Err(_) => Part::bytes(data.to_vec()).file_name(file_name),
    }
}

fn status_error(status: StatusCode, body: &str) -> AppError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string());
    if status == StatusCode::BAD_REQUEST {
        AppError::invalid_request(message)
    } else {
        AppError::stream_unavailable(format!("server returned {status}: {message}"))
    }
}
