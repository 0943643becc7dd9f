use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parley_storage::{
    DEFAULT_SESSION_TITLE, FeedConfig, MessageRecord, NewSession, SessionPatch, SessionRecord,
    Storage, StorageError, StorageResult, watch_messages, watch_sessions,
};
use parley_webhook::ReplyDispatcher;
use snafu::{IntoError, ResultExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::chat::events::{ChatCommand, ChatEvent};
use crate::chat::grouping::{MessageGroup, group_messages};
use crate::chat::message::{Message, Role, Session, SessionId};
use crate::chat::message_list::MessageList;
use crate::chat::presence::{AwaitingReply, is_thinking, show_indicator, thinking_phrase};
use crate::chat::scroll_manager::ScrollCommand;
use crate::chat::sidebar::{SessionListItem, session_list_items};
use crate::chat::title::derive_session_title;
use crate::error::{ChatError, ChatResult, DeliverySnafu, ReplyTimedOutSnafu, StorageSnafu};

pub type ChatEvents = mpsc::UnboundedReceiver<ChatEvent>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatOptions {
    pub feed: FeedConfig,
    /// `None` waits for a reply indefinitely.
    pub reply_timeout: Option<Duration>,
}

/// Owns the session list, the active transcript and the loading flag.
///
/// Background tasks never touch this state directly; they report `ChatEvent`s which the
/// owner feeds back through `apply_event` in arrival order.
pub struct ChatView<S: Storage + 'static> {
    store: Arc<S>,
    dispatcher: Arc<dyn ReplyDispatcher>,
    options: ChatOptions,
    events_tx: mpsc::UnboundedSender<ChatEvent>,
    sessions: Vec<Session>,
    active_session_id: Option<SessionId>,
    messages: Vec<Message>,
    awaiting: AwaitingReply,
    message_list: MessageList,
    phrase_tick: usize,
    last_error: Option<ChatError>,
    session_loads_issued: u64,
    session_loads_applied: u64,
    /// Session loads issued up to the moment the active session was selected.
    active_selected_at_load: u64,
    /// Locally deleted sessions, with the session loads issued before each delete.
    deleted_sessions: HashMap<SessionId, u64>,
    session_feed_task: Option<JoinHandle<()>>,
    message_feed_task: Option<JoinHandle<()>>,
}

impl<S: Storage + 'static> ChatView<S> {
    pub fn new(
        store: Arc<S>,
        dispatcher: Arc<dyn ReplyDispatcher>,
        options: ChatOptions,
    ) -> (Self, ChatEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut view = Self {
            store,
            dispatcher,
            options,
            events_tx,
            sessions: Vec::new(),
            active_session_id: None,
            messages: Vec::new(),
            awaiting: AwaitingReply::default(),
            message_list: MessageList::new(),
            phrase_tick: 0,
            last_error: None,
            session_loads_issued: 0,
            session_loads_applied: 0,
            active_selected_at_load: 0,
            deleted_sessions: HashMap::new(),
            session_feed_task: None,
            message_feed_task: None,
        };
        view.refresh_transcript();
        (view, events_rx)
    }

    /// Subscribes to session changes and loads the session list.
    pub fn start(&mut self) {
        if let Some(task) = self.session_feed_task.take() {
            task.abort();
        }

        let store = self.store.clone();
        let events = self.events_tx.clone();
        let feed_config = self.options.feed;
        self.session_feed_task = Some(tokio::spawn(async move {
            let feed = watch_sessions(store, feed_config);
            futures::pin_mut!(feed);
            while let Some(item) = feed.next().await {
                let event = match item {
                    Ok(_) => ChatEvent::SessionsChanged,
                    Err(error) => ChatEvent::FeedFailed {
                        session_id: None,
                        error,
                    },
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        }));

        self.refresh_sessions();
    }

    pub fn refresh_sessions(&mut self) {
        self.session_loads_issued += 1;
        let generation = self.session_loads_issued;
        let store = self.store.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = store.list_sessions().await;
            let _ = events.send(ChatEvent::SessionsLoaded { generation, result });
        });
    }

    /// Makes `session_id` active: loads its transcript and follows new messages.
    pub fn select_session(&mut self, session_id: SessionId) {
        if self.active_session_id == Some(session_id) {
            return;
        }

        if let Some(task) = self.message_feed_task.take() {
            task.abort();
        }
        if self
            .awaiting
            .session_id()
            .is_some_and(|pending| pending != session_id)
        {
            self.awaiting.clear();
        }

        self.active_session_id = Some(session_id);
        self.active_selected_at_load = self.session_loads_issued;
        self.messages.clear();
        self.message_list.reset_scroll_tracking();
        self.refresh_transcript();

        let store = self.store.clone();
        let events = self.events_tx.clone();
        let feed_config = self.options.feed;
        self.message_feed_task = Some(tokio::spawn(async move {
            let result = store.list_messages(session_id).await;
            let after_seq = result
                .as_ref()
                .ok()
                .and_then(|records| records.last())
                .map_or(0, |record| record.seq);
            let loaded = ChatEvent::MessagesLoaded { session_id, result };
            if events.send(loaded).is_err() {
                return;
            }

            let feed = watch_messages(store, session_id, after_seq, feed_config);
            futures::pin_mut!(feed);
            while let Some(item) = feed.next().await {
                let event = match item {
                    Ok(record) => ChatEvent::MessageInserted(record),
                    Err(error) => ChatEvent::FeedFailed {
                        session_id: Some(session_id),
                        error,
                    },
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        }));
    }

    pub fn apply_event(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::SessionsLoaded { generation, result } => {
                self.handle_sessions_loaded(generation, result)
            }
            ChatEvent::SessionsChanged => self.refresh_sessions(),
            ChatEvent::MessagesLoaded { session_id, result } => {
                self.handle_messages_loaded(session_id, result)
            }
            ChatEvent::MessageInserted(record) => self.handle_message_inserted(record),
            ChatEvent::FeedFailed { session_id, error } => {
                if session_id.is_some_and(|id| Some(id) != self.active_session_id) {
                    return;
                }
                tracing::error!("change feed failed: {}", error);
                self.last_error = Some(StorageSnafu { stage: "change-feed" }.into_error(error));
            }
            ChatEvent::DeliveryFailed { session_id, error } => {
                tracing::error!(
                    "failed to deliver message for session {}: {}",
                    session_id,
                    error
                );
                if self.awaiting.session_id() == Some(session_id) {
                    self.awaiting.clear();
                    self.refresh_transcript();
                }
                self.last_error = Some(
                    DeliverySnafu {
                        stage: "webhook-dispatch",
                    }
                    .into_error(error),
                );
            }
        }
    }

    /// Runs one front-end intent; failures are logged and kept in `last_error`.
    pub async fn handle_command(&mut self, command: ChatCommand) {
        let result = match command {
            ChatCommand::NewChat => self.new_chat().await.map(|_| ()),
            ChatCommand::SelectSession(session_id) => {
                self.select_session(session_id);
                Ok(())
            }
            ChatCommand::DeleteSession(session_id) => self.delete_session(session_id).await,
            ChatCommand::Send(content) => self.send_message(&content).await,
            ChatCommand::CancelWaiting => {
                self.cancel_waiting();
                Ok(())
            }
        };

        if let Err(error) = result {
            tracing::error!("chat command failed: {}", error);
            self.last_error = Some(error);
        }
    }

    pub async fn new_chat(&mut self) -> ChatResult<SessionId> {
        let record = self
            .store
            .create_session(NewSession::new(DEFAULT_SESSION_TITLE))
            .await
            .context(StorageSnafu {
                stage: "new-chat-create-session",
            })?;

        let session_id = record.id;
        self.sessions.insert(0, Session::from(record));
        self.select_session(session_id);
        self.refresh_sessions();
        tracing::info!("created session {}", session_id);
        Ok(session_id)
    }

    pub async fn delete_session(&mut self, session_id: SessionId) -> ChatResult<()> {
        self.store
            .delete_session(session_id)
            .await
            .context(StorageSnafu {
                stage: "delete-session",
            })?;

        self.deleted_sessions
            .insert(session_id, self.session_loads_issued);
        self.sessions.retain(|session| session.id != session_id);
        if self.active_session_id == Some(session_id) {
            self.clear_active_session();
        }

        self.refresh_sessions();
        tracing::info!("deleted session {}", session_id);
        Ok(())
    }

    /// Hands the message to the dispatcher. The reply, and the stored copy of the user message,
    /// come back through the message feed.
    pub async fn send_message(&mut self, content: &str) -> ChatResult<()> {
        let content = content.trim();
        if content.is_empty() || self.awaiting.is_active() {
            return Ok(());
        }

        let mut sessions_changed = false;
        let session_id = match self.active_session_id {
            Some(session_id) => {
                if self.messages.is_empty() && self.active_title() == Some(DEFAULT_SESSION_TITLE) {
                    self.retitle_session(session_id, derive_session_title(content))
                        .await;
                    sessions_changed = true;
                }
                session_id
            }
            None => {
                let record = self
                    .store
                    .create_session(NewSession::new(derive_session_title(content)))
                    .await
                    .context(StorageSnafu {
                        stage: "send-create-session",
                    })?;
                let session_id = record.id;
                self.sessions.insert(0, Session::from(record));
                self.select_session(session_id);
                sessions_changed = true;
                session_id
            }
        };

        self.awaiting.start(session_id, Utc::now());
        self.last_error = None;
        self.refresh_transcript();

        let dispatcher = self.dispatcher.clone();
        let events = self.events_tx.clone();
        let message = content.to_string();
        tokio::spawn(async move {
            if let Err(error) = dispatcher.dispatch(session_id, message).await {
                let _ = events.send(ChatEvent::DeliveryFailed { session_id, error });
            }
        });

        if sessions_changed {
            self.refresh_sessions();
        }
        Ok(())
    }

    /// Stops waiting for a reply that may never come.
    pub fn cancel_waiting(&mut self) {
        if self.awaiting.is_active() {
            self.awaiting.clear();
            self.refresh_transcript();
        }
    }

    /// Gives up on an outstanding reply once the configured timeout passed.
    pub fn check_reply_timeout(&mut self, now: DateTime<Utc>) -> bool {
        if !self.awaiting.is_expired(now, self.options.reply_timeout) {
            return false;
        }

        let Some(session_id) = self.awaiting.session_id() else {
            return false;
        };
        tracing::warn!("no reply arrived for session {}", session_id);
        self.awaiting.clear();
        self.last_error = Some(
            ReplyTimedOutSnafu {
                stage: "reply-timeout",
                session_id,
            }
            .build(),
        );
        self.refresh_transcript();
        true
    }

    pub fn advance_thinking_phrase(&mut self) {
        self.phrase_tick = self.phrase_tick.wrapping_add(1);
        self.message_list
            .set_thinking_phrase(thinking_phrase(self.phrase_tick));
    }

    pub fn apply_pending_scroll(&mut self) -> Option<ScrollCommand> {
        self.message_list.apply_pending_scroll()
    }

    pub fn groups(&self) -> Vec<MessageGroup<'_>> {
        group_messages(&self.messages)
    }

    pub fn is_thinking(&self) -> bool {
        is_thinking(&self.messages)
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting.is_active()
    }

    pub fn show_thinking_indicator(&self) -> bool {
        let loading = self.awaiting.is_active()
            && self.awaiting.session_id() == self.active_session_id;
        show_indicator(&self.messages, loading)
    }

    pub fn input_enabled(&self) -> bool {
        !self.awaiting.is_active()
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session_items(&self) -> Vec<SessionListItem> {
        session_list_items(&self.sessions, self.active_session_id, Utc::now())
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.active_session_id
    }

    pub fn active_session(&self) -> Option<&Session> {
        let active = self.active_session_id?;
        self.sessions.iter().find(|session| session.id == active)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message_list(&self) -> &MessageList {
        &self.message_list
    }

    pub fn set_viewport(&mut self, columns: usize, lines: usize) {
        self.message_list.set_viewport(columns, lines);
    }

    pub fn last_error(&self) -> Option<&ChatError> {
        self.last_error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    fn handle_sessions_loaded(
        &mut self,
        generation: u64,
        result: StorageResult<Vec<SessionRecord>>,
    ) {
        if generation < self.session_loads_applied {
            tracing::debug!("discarding stale session list {}", generation);
            return;
        }
        self.session_loads_applied = generation;

        let records = match result {
            Ok(records) => records,
            Err(error) => {
                tracing::error!("failed to load sessions: {}", error);
                self.last_error = Some(StorageSnafu { stage: "load-sessions" }.into_error(error));
                return;
            }
        };

        self.sessions = records
            .into_iter()
            .filter(|record| !self.deleted_sessions.contains_key(&record.id))
            .map(Session::from)
            .collect();
        // Lists requested after a delete no longer contain the row.
        self.deleted_sessions
            .retain(|_, loads_before_delete| *loads_before_delete >= generation);

        // Only a list requested after the selection can prove the session is gone.
        if let Some(active) = self.active_session_id
            && generation > self.active_selected_at_load
            && !self.sessions.iter().any(|session| session.id == active)
        {
            tracing::info!("active session {} disappeared", active);
            self.clear_active_session();
        }

        if self.active_session_id.is_none()
            && let Some(first) = self.sessions.first()
        {
            let first = first.id;
            self.select_session(first);
        }
    }

    fn handle_messages_loaded(
        &mut self,
        session_id: SessionId,
        result: StorageResult<Vec<MessageRecord>>,
    ) {
        if self.active_session_id != Some(session_id) {
            tracing::debug!("discarding messages for inactive session {}", session_id);
            return;
        }

        let records = match result {
            Ok(records) => records,
            Err(error) => {
                tracing::error!("failed to load messages for session {}: {}", session_id, error);
                self.last_error = Some(StorageSnafu { stage: "load-messages" }.into_error(error));
                return;
            }
        };

        let mut messages = records.into_iter().map(Message::from).collect::<Vec<_>>();
        messages.sort_by_key(|message| message.seq);
        self.messages = messages;
        self.awaiting
            .sync_with_transcript(session_id, &self.messages, Utc::now());
        self.refresh_transcript();
    }

    fn handle_message_inserted(&mut self, record: MessageRecord) {
        if self.active_session_id != Some(record.session_id) {
            tracing::debug!("discarding message for inactive session {}", record.session_id);
            return;
        }
        if self.messages.iter().any(|message| message.id == record.id) {
            tracing::debug!("ignoring duplicate message {}", record.id);
            return;
        }

        let message = Message::from(record);
        let index = self
            .messages
            .partition_point(|existing| existing.seq <= message.seq);
        let is_newest = index == self.messages.len();
        let role = message.role;
        let session_id = message.session_id;
        self.messages.insert(index, message);

        match role {
            Role::Agent => self.awaiting.clear(),
            Role::User => {
                if is_newest && !self.awaiting.is_active() {
                    self.awaiting.start(session_id, Utc::now());
                }
            }
        }
        self.refresh_transcript();
    }

    async fn retitle_session(&mut self, session_id: SessionId, title: String) {
        let patch = SessionPatch {
            title: Some(title.clone()),
        };
        match self.store.update_session(session_id, patch).await {
            Ok(record) => {
                if let Some(session) = self
                    .sessions
                    .iter_mut()
                    .find(|session| session.id == session_id)
                {
                    *session = Session::from(record);
                }
            }
            Err(error) => self.report_retitle_failure(session_id, &title, error),
        }
    }

    fn report_retitle_failure(&mut self, session_id: SessionId, title: &str, error: StorageError) {
        // The message still goes out under the old title.
        tracing::error!(
            "failed to rename session {} to '{}': {}",
            session_id,
            title,
            error
        );
        self.last_error = Some(StorageSnafu { stage: "retitle-session" }.into_error(error));
    }

    fn active_title(&self) -> Option<&str> {
        self.active_session().map(|session| session.title.as_str())
    }

    fn clear_active_session(&mut self) {
        if let Some(task) = self.message_feed_task.take() {
            task.abort();
        }
        self.active_session_id = None;
        self.messages.clear();
        self.awaiting.clear();
        self.message_list.reset_scroll_tracking();
        self.refresh_transcript();
    }

    fn refresh_transcript(&mut self) {
        let phrase = self
            .show_thinking_indicator()
            .then(|| thinking_phrase(self.phrase_tick));
        self.message_list.set_transcript(&self.messages, phrase);
    }
}

impl<S: Storage + 'static> Drop for ChatView<S> {
    fn drop(&mut self) {
        if let Some(task) = self.session_feed_task.take() {
            task.abort();
        }
        if let Some(task) = self.message_feed_task.take() {
            task.abort();
        }
    }
}
