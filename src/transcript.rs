use tracing::error;

use crate::errors::AppError;
use crate::models::Message;
use crate::project::ProjectSource;

/// Directive sent out-of-band (as the provider's system/preamble field).
pub const SYSTEM_DIRECTIVE: &str = "You are an expert software engineer helping with the project whose files \
                                    are listed in the first message. Answer questions about it, propose \
                                    concrete changes as complete code blocks, and say so when you are unsure.";

/// Assembles the ordered message list sent upstream.
///
/// The project context is re-asserted on every turn, not only the first one,
/// so the model always sees the current project state.
pub fn build_transcript(
    is_initial: bool,
    project_context: Message,
    history: Vec<Message>,
) -> Vec<Message> {
    if is_initial {
        return vec![project_context];
    }
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(project_context);
    messages.extend(history);
    messages
}

/// Resolves the project context through `source`, then builds the transcript.
/// Fails with a configuration error before anything is sent upstream.
pub async fn assemble(
    source: &dyn ProjectSource,
    project_dir: &str,
    is_initial: bool,
    history: Vec<Message>,
) -> Result<Vec<Message>, AppError> {
    let context = source.context_message(project_dir).await.map_err(|e| {
        error!("Failed to build project context for {project_dir}: {e}");
        match e {
            AppError::Configuration { .. } => e,
            other => AppError::configuration(other.to_string()),
        }
    })?;
    Ok(build_transcript(is_initial, context, history))
}
