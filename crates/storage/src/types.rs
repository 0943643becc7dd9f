use super::ids::{MessageId, SessionId};

/// Title given to sessions opened with the "New Chat" action.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Storage-local message role, decoupled from the front-end role enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    User,
    Agent,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: SessionId,
    pub title: String,
    pub created_at_unix_millis: u64,
    pub updated_at_unix_millis: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub title: String,
}

impl NewSession {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionPatch {
    pub title: Option<String>,
}

/// Cheap fingerprint of the session table used by the polling change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionRevision {
    pub session_count: u64,
    pub max_updated_at_unix_millis: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub session_id: SessionId,
    pub seq: u64,
    pub role: MessageRole,
    pub content: String,
    pub content_html: Option<String>,
    /// `None` and `Some(true)` both mean a completed agent answer.
    pub is_final: Option<bool>,
    pub created_at_unix_millis: u64,
    pub metadata: serde_json::Value,
}

/// One incremental read of a session's messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageBatch {
    pub records: Vec<MessageRecord>,
    /// Highest `seq` read, including rows that could not be decoded and were skipped.
    pub last_seq: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub content_html: Option<String>,
    pub is_final: Option<bool>,
    pub metadata: serde_json::Value,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            content_html: None,
            is_final: None,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn agent(content: impl Into<String>, is_final: bool) -> Self {
        Self {
            role: MessageRole::Agent,
            content: content.into(),
            content_html: None,
            is_final: Some(is_final),
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_content_html(mut self, content_html: impl Into<String>) -> Self {
        self.content_html = Some(content_html.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
