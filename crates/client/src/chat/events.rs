use parley_storage::{MessageRecord, SessionRecord, StorageError, StorageResult};
use parley_webhook::WebhookError;

use crate::chat::message::SessionId;

/// Results reported back to the controller by its background tasks.
#[derive(Debug)]
pub enum ChatEvent {
    /// `generation` orders reloads so an older list never overwrites a newer one.
    SessionsLoaded {
        generation: u64,
        result: StorageResult<Vec<SessionRecord>>,
    },
    /// The session table changed somewhere, possibly in another process.
    SessionsChanged,
    MessagesLoaded {
        session_id: SessionId,
        result: StorageResult<Vec<MessageRecord>>,
    },
    MessageInserted(MessageRecord),
    FeedFailed {
        session_id: Option<SessionId>,
        error: StorageError,
    },
    DeliveryFailed {
        session_id: SessionId,
        error: WebhookError,
    },
}

impl ChatEvent {
    /// Session the event is scoped to, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::MessagesLoaded { session_id, .. } | Self::DeliveryFailed { session_id, .. } => {
                Some(*session_id)
            }
            Self::MessageInserted(record) => Some(record.session_id),
            Self::FeedFailed { session_id, .. } => *session_id,
            Self::SessionsLoaded { .. } | Self::SessionsChanged => None,
        }
    }
}

/// Intents signalled by front-end components; only the controller mutates chat state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    NewChat,
    SelectSession(SessionId),
    DeleteSession(SessionId),
    Send(String),
    CancelWaiting,
}
