use chrono::{DateTime, Utc};
use parley_storage::{MessageRecord, MessageRole, SessionRecord};

pub use parley_storage::{MessageId, SessionId};

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Agent,
}

impl From<MessageRole> for Role {
    fn from(role: MessageRole) -> Self {
        match role {
            MessageRole::User => Self::User,
            MessageRole::Agent => Self::Agent,
        }
    }
}

/// One immutable turn of a transcript as the front-end sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    /// Per-session order key assigned by the store.
    pub seq: u64,
    pub role: Role,
    pub content: String,
    pub content_html: Option<String>,
    /// `Some(false)` marks an intermediate agent step; absent or `true` is a final answer.
    pub is_final: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl Message {
    pub fn new(
        session_id: SessionId,
        seq: u64,
        role: Role,
        content: impl Into<String>,
        is_final: Option<bool>,
    ) -> Self {
        Self {
            id: MessageId::new_v7(),
            session_id,
            seq,
            role,
            content: content.into(),
            content_html: None,
            is_final,
            created_at: Utc::now(),
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn user(session_id: SessionId, seq: u64, content: impl Into<String>) -> Self {
        Self::new(session_id, seq, Role::User, content, None)
    }

    pub fn agent(
        session_id: SessionId,
        seq: u64,
        content: impl Into<String>,
        is_final: Option<bool>,
    ) -> Self {
        Self::new(session_id, seq, Role::Agent, content, is_final)
    }

    /// True for agent reasoning steps that precede a final answer.
    pub fn is_intermediate(&self) -> bool {
        self.role == Role::Agent && self.is_final == Some(false)
    }
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            session_id: record.session_id,
            seq: record.seq,
            role: record.role.into(),
            content: record.content,
            content_html: record.content_html,
            is_final: record.is_final,
            created_at: datetime_from_unix_millis(record.created_at_unix_millis),
            metadata: record.metadata,
        }
    }
}

/// Sidebar-facing view of a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

impl From<SessionRecord> for Session {
    fn from(record: SessionRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            updated_at: datetime_from_unix_millis(record.updated_at_unix_millis),
        }
    }
}

pub(crate) fn datetime_from_unix_millis(millis: u64) -> DateTime<Utc> {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_agent_messages_with_final_false_are_intermediate() {
        let session_id = SessionId::new_v7();
        assert!(Message::agent(session_id, 1, "step", Some(false)).is_intermediate());
        assert!(!Message::agent(session_id, 2, "answer", Some(true)).is_intermediate());
        assert!(!Message::agent(session_id, 3, "answer", None).is_intermediate());

        let mut odd_user = Message::user(session_id, 4, "hi");
        odd_user.is_final = Some(false);
        assert!(!odd_user.is_intermediate());
    }

    #[test]
    fn record_conversion_keeps_fields() {
        let session_id = SessionId::new_v7();
        let record = MessageRecord {
            id: MessageId::new_v7(),
            session_id,
            seq: 7,
            role: MessageRole::Agent,
            content: "**done**".to_string(),
            content_html: Some("<p><strong>done</strong></p>".to_string()),
            is_final: Some(true),
            created_at_unix_millis: 1_714_555_800_000,
            metadata: serde_json::json!({ "tool": "search" }),
        };

        let message = Message::from(record.clone());
        assert_eq!(message.id, record.id);
        assert_eq!(message.role, Role::Agent);
        assert_eq!(message.seq, 7);
        assert_eq!(message.created_at.timestamp_millis(), 1_714_555_800_000);
        assert_eq!(message.metadata["tool"], "search");
    }
}
