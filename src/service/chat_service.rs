use std::sync::Arc;

use futures_util::{Stream, StreamExt, stream};
use tracing::{error, info};

use crate::agent::{DeltaStream, UpstreamInvoker, UpstreamRequest};
use crate::config::UpstreamConfig;
use crate::errors::AppError;
use crate::models::{FileListing, Message, Role, ServerEvent, WireMessage};
use crate::project::ProjectSource;
use crate::transcript::{self, SYSTEM_DIRECTIVE};

/// A validated turn, ready to be sent upstream.
#[derive(Debug, Clone)]
pub struct PreparedTurn {
    pub request: UpstreamRequest,
    /// The client's conversation so far, echoed back in the final event.
    pub history: Vec<WireMessage>,
}

#[derive(Clone)]
pub struct ChatService {
    source: Arc<dyn ProjectSource>,
    invoker: Arc<dyn UpstreamInvoker>,
    upstream: UpstreamConfig,
}

impl ChatService {
    pub fn new(
        source: Arc<dyn ProjectSource>,
        invoker: Arc<dyn UpstreamInvoker>,
        upstream: UpstreamConfig,
    ) -> Self {
        Self { source, invoker, upstream }
    }

    pub async fn list_files(&self, project_dir: &str) -> Result<FileListing, AppError> {
        if project_dir.trim().is_empty() {
            return Err(AppError::EmptyField { field_name: "projectDir".to_string() });
        }
        self.source.list_files(project_dir).await
    }

    /// Validates the request and assembles the upstream transcript.
    /// `history` must already carry its attachments.
    pub async fn prepare_turn(
        &self,
        project_dir: &str,
        is_initial: bool,
        history: Vec<Message>,
    ) -> Result<PreparedTurn, AppError> {
        if project_dir.trim().is_empty() {
            return Err(AppError::EmptyField { field_name: "projectDir".to_string() });
        }
        let wire_history = history.iter().map(Message::to_wire).collect();
        let messages =
            transcript::assemble(self.source.as_ref(), project_dir, is_initial, history).await?;
        info!(
            "Prepared {} turn for project {project_dir} with {} messages",
            if is_initial { "initial" } else { "follow-up" },
            messages.len()
        );

        Ok(PreparedTurn {
            request: UpstreamRequest {
                directive: SYSTEM_DIRECTIVE.to_string(),
                messages,
                context_id: project_dir.to_string(),
            },
            history: wire_history,
        })
    }

    /// Starts the upstream call and returns the events to forward to the client:
    /// one delta per fragment, then a final transcript with the reply appended.
    /// If the upstream fails mid-reply the stream yields that error and ends,
    /// so the response body is aborted instead of looking like a finished reply.
    pub async fn stream_turn(
        &self,
        turn: PreparedTurn,
    ) -> Result<impl Stream<Item = Result<ServerEvent, AppError>> + Send + 'static, AppError> {
        let context_id = turn.request.context_id.clone();
        let deltas = self.invoker.stream_reply(&self.upstream, turn.request).await?;
        Ok(reply_events(deltas, turn.history, context_id))
    }
}

struct ReplyState {
    deltas: DeltaStream,
    reply: String,
    history: Vec<WireMessage>,
    context_id: String,
}

fn reply_events(
    deltas: DeltaStream,
    history: Vec<WireMessage>,
    context_id: String,
) -> impl Stream<Item = Result<ServerEvent, AppError>> + Send + 'static {
    let state = ReplyState { deltas, reply: String::new(), history, context_id };

    stream::unfold(Some(state), |state| async move {
        let mut st = state?;
        match st.deltas.next().await {
            Some(Ok(text)) => {
                st.reply.push_str(&text);
                Some((Ok(ServerEvent::Delta { content: text }), Some(st)))
            }
            Some(Err(e)) => {
                error!("Upstream stream failed for project {}: {e}", st.context_id);
                Some((Err(e), None))
            }
            None => {
                info!("Reply for project {} finished ({} bytes)", st.context_id, st.reply.len());
                let mut history = st.history;
                history.push(WireMessage { role: Role::Assistant, content: st.reply });
                Some((Ok(ServerEvent::Final { conversation_history: history }), None))
            }
        }
    })
}
