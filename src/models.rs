use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A binary image attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub media_type: String,
    pub data: Bytes,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, media_type: impl Into<String>, data: Bytes) -> Self {
        Self { file_name: file_name.into(), media_type: media_type.into(), data }
    }
}

/// One turn in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub images: Vec<Attachment>,
    pub is_complete: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), images: Vec::new(), is_complete: true }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// An empty assistant message that is still receiving deltas.
    pub fn open_assistant() -> Self {
        Self { is_complete: false, ..Self::assistant("") }
    }

    pub fn with_images(mut self, images: Vec<Attachment>) -> Self {
        self.images = images;
        self
    }

    pub fn to_wire(&self) -> WireMessage {
        WireMessage { role: self.role, content: self.content.clone() }
    }
}

/// Role and content only; attachments travel as separate multipart parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl From<WireMessage> for Message {
    fn from(w: WireMessage) -> Self {
        Message::new(w.role, w.content)
    }
}

/// Ordered conversation history for one session.
///
/// Only the last message may be incomplete. The mutators below are the only
/// way to change the sequence and each one preserves that.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Appends a message. A trailing incomplete message is sealed first so
    /// only the last message can ever be open.
    pub fn push(&mut self, message: Message) {
        if let Some(last) = self.messages.last_mut() {
            if !last.is_complete {
                last.is_complete = true;
            }
        }
        self.messages.push(message);
    }

    /// Appends `text` to the last message while it is still open.
    /// Returns `false` when there is no open message to extend.
    pub fn append_to_open(&mut self, text: &str) -> bool {
        match self.messages.last_mut() {
            Some(last) if !last.is_complete => {
                last.content.push_str(text);
                true
            }
            _ => false,
        }
    }

    /// Marks the last message complete.
    pub fn complete_last(&mut self) {
        if let Some(last) = self.messages.last_mut() {
            last.is_complete = true;
        }
    }

    /// Replaces the whole history; every supplied message is complete.
    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages
            .into_iter()
            .map(|m| Message { is_complete: true, ..m })
            .collect();
    }

    /// Copies attachments from `previous` onto messages at the same position
    /// with the same role and content. Final transcripts arrive without
    /// images, so this keeps a session's image history across replacements.
    pub fn restore_images(&mut self, previous: &[Message]) {
        for (message, old) in self.messages.iter_mut().zip(previous) {
            if message.images.is_empty() && message.role == old.role && message.content == old.content {
                message.images = old.images.clone();
            }
        }
    }

    /// Whether the trailing message was left open by an interrupted turn.
    pub fn is_interrupted(&self) -> bool {
        self.messages.last().is_some_and(|m| !m.is_complete)
    }

    pub fn to_wire(&self) -> Vec<WireMessage> {
        self.messages.iter().map(Message::to_wire).collect()
    }
}

/// JSON body for `POST /api/chat`.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub project_dir: String,
    #[serde(default)]
    pub is_initial: bool,
    #[serde(default)]
    pub conversation_history: Vec<WireMessage>,
}

/// Server-sent event payloads.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerEvent {
    Delta { content: String },
    #[serde(rename_all = "camelCase")]
    Final { conversation_history: Vec<WireMessage> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListing {
    pub files: Vec<FileInfo>,
    pub total_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_seals_an_open_trailing_message() {
        let mut t = Transcript::new();
        t.push(Message::user("hi"));
        t.push(Message::open_assistant());
        assert!(t.is_interrupted());

        t.push(Message::user("again"));
        assert!(t.messages().iter().all(|m| m.is_complete));
    }

    #[test]
    fn append_only_touches_open_last_message() {
        let mut t = Transcript::new();
        t.push(Message::assistant("done"));
        assert!(!t.append_to_open("x"));
        assert_eq!(t.messages()[0].content, "done");

        t.push(Message::open_assistant());
        assert!(t.append_to_open("ab"));
        assert!(t.append_to_open("c"));
        assert_eq!(t.last().map(|m| m.content.as_str()), Some("abc"));
        assert_eq!(t.messages()[0].content, "done");
    }

    #[test]
    fn server_events_serialize_to_wire_shapes() {
        let delta = serde_json::to_string(&ServerEvent::Delta { content: "Hi".into() }).unwrap();
        assert_eq!(delta, r#"{"content":"Hi"}"#);

        let fin = serde_json::to_string(&ServerEvent::Final {
            conversation_history: vec![Message::user("q").to_wire()],
        })
        .unwrap();
        assert_eq!(fin, r#"{"conversationHistory":[{"role":"user","content":"q"}]}"#);
    }

    #[test]
    fn roles_use_lowercase_wire_names() {
        let msg: WireMessage = serde_json::from_str(r#"{"role":"assistant","content":"x"}"#).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.role.to_string(), "assistant");
        assert!(serde_json::from_str::<WireMessage>(r#"{"role":"system","content":"x"}"#).is_err());
    }
}
