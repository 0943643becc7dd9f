//! Backend data service for the chat client: sessions, append-only messages and a
//! polling change feed over them.

use std::future::Future;

pub mod error;
pub mod feed;
pub mod ids;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use feed::{FeedConfig, watch_messages, watch_sessions};
pub use ids::{MessageId, SessionId};
pub use sqlite::SqliteStorage;
pub use types::{
    DEFAULT_SESSION_TITLE, MessageBatch, MessageRecord, MessageRole, NewMessage, NewSession,
    SessionPatch, SessionRecord, SessionRevision,
};

pub trait SessionStore: Send + Sync {
    fn create_session(
        &self,
        input: NewSession,
    ) -> impl Future<Output = StorageResult<SessionRecord>> + Send;

    /// Most recently updated first.
    fn list_sessions(&self) -> impl Future<Output = StorageResult<Vec<SessionRecord>>> + Send;

    fn get_session(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = StorageResult<Option<SessionRecord>>> + Send;

    fn update_session(
        &self,
        session_id: SessionId,
        patch: SessionPatch,
    ) -> impl Future<Output = StorageResult<SessionRecord>> + Send;

    /// Removes the session together with its messages.
    fn delete_session(&self, session_id: SessionId)
    -> impl Future<Output = StorageResult<()>> + Send;

    fn session_revision(&self) -> impl Future<Output = StorageResult<SessionRevision>> + Send;
}

pub trait MessageStore: Send + Sync {
    fn append_message(
        &self,
        session_id: SessionId,
        input: NewMessage,
    ) -> impl Future<Output = StorageResult<MessageRecord>> + Send;

    /// Creation order, oldest first. Rows that cannot be decoded are skipped.
    fn list_messages(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = StorageResult<Vec<MessageRecord>>> + Send;

    /// Messages with `seq` strictly greater than `after_seq`, oldest first.
    fn list_messages_after(
        &self,
        session_id: SessionId,
        after_seq: u64,
    ) -> impl Future<Output = StorageResult<MessageBatch>> + Send;
}

pub trait Storage: SessionStore + MessageStore {}

impl<T> Storage for T where T: SessionStore + MessageStore {}
