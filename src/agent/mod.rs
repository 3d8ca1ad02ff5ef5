use async_trait::async_trait;
use base64::Engine;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use rig::OneOrMany;
use rig::client::Nothing;
use rig::completion::message::{ImageDetail, ImageMediaType};
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::message::UserContent;
use rig::prelude::CompletionClient;
use rig::providers::ollama;
use rig::streaming::StreamedAssistantContent;
use tracing::{debug, error, info};

use crate::config::UpstreamConfig;
use crate::errors::AppError;
use crate::models::{Attachment, Message, Role};

/// Incremental text fragments of an assistant reply.
pub type DeltaStream = BoxStream<'static, Result<String, AppError>>;

/// Everything the provider needs for one turn.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// System directive, sent out-of-band from the message list.
    pub directive: String,
    pub messages: Vec<Message>,
    /// Identifies the project the conversation is about.
    pub context_id: String,
}

/// Calls the AI provider and streams back the reply.
#[async_trait]
pub trait UpstreamInvoker: Send + Sync {
    async fn stream_reply(
        &self,
        config: &UpstreamConfig,
        request: UpstreamRequest,
    ) -> Result<DeltaStream, AppError>;
}

fn media_type(attachment: &Attachment) -> Option<ImageMediaType> {
    match attachment.media_type.as_str() {
        "image/png" => Some(ImageMediaType::PNG),
        "image/jpeg" | "image/jpg" => Some(ImageMediaType::JPEG),
        "image/gif" => Some(ImageMediaType::GIF),
        "image/webp" => Some(ImageMediaType::WEBP),
        _ => None,
    }
}

/// Converts a stored [`Message`] into a rig message, inlining images as base64.
fn to_rig_message(message: &Message) -> RigMessage {
    match message.role {
        Role::Assistant => RigMessage::assistant(&message.content),
        Role::User if message.images.is_empty() => RigMessage::user(&message.content),
        Role::User => {
            let mut content = vec![UserContent::text(&message.content)];
            content.extend(message.images.iter().map(|img| {
                let b64 = base64::engine::general_purpose::STANDARD.encode(&img.data);
                UserContent::image_base64(b64, media_type(img), Some(ImageDetail::Auto))
            }));
            match OneOrMany::many(content) {
                Ok(content) => RigMessage::User { content },
                Err(_) => RigMessage::user(&message.content),
            }
        }
    }
}

/// Maps a rig error onto the application taxonomy by inspecting its message.
fn classify(e: impl std::fmt::Display, config: &UpstreamConfig) -> AppError {
    let msg = e.to_string();
    if msg.contains("Connection refused") || msg.contains("connect") {
        AppError::UpstreamUnavailable { host: config.base_url.clone() }
    } else if msg.contains("model") {
        AppError::ModelNotFound { model_name: config.model.clone() }
    } else {
        AppError::InferenceError { message: msg }
    }
}

/// Streams completions from a local Ollama server through rig.
/// A fresh client is built per request so configuration changes apply immediately.
#[derive(Debug, Clone, Default)]
pub struct OllamaInvoker;

impl OllamaInvoker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UpstreamInvoker for OllamaInvoker {
    async fn stream_reply(
        &self,
        config: &UpstreamConfig,
        request: UpstreamRequest,
    ) -> Result<DeltaStream, AppError> {
        if config.api_key.is_some() {
            debug!("Ollama does not use an API key; ignoring the configured one");
        }
        let client: ollama::Client = ollama::Client::builder()
            .api_key(Nothing)
            .base_url(&config.base_url)
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build Ollama client: {e}")))?;
        let model = client.completion_model(config.model.clone());

        let mut messages: Vec<RigMessage> = request.messages.iter().map(to_rig_message).collect();
        let Some(prompt) = messages.pop() else {
            return Err(AppError::invalid_request("no messages to send upstream"));
        };

        info!(
            "Streaming reply for project {} ({} messages, model {})",
            request.context_id,
            request.messages.len(),
            config.model
        );

        let response = model
            .completion_request(prompt)
            .messages(messages)
            .preamble(request.directive)
            .stream()
            .await
            .map_err(|e| {
                error!("Upstream request failed for project {}: {e}", request.context_id);
                classify(e, config)
            })?;

        let deltas = response.filter_map(|item| async move {
            match item {
                Ok(StreamedAssistantContent::Text(text)) => Some(Ok(text.text)),
                Ok(_) => None,
                Err(e) => Some(Err(AppError::InferenceError { message: e.to_string() })),
            }
        });
        Ok(deltas.boxed())
    }
}
