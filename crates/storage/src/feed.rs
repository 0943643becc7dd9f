//! Polling change feed.
//!
//! Replies are written by an external automation, possibly from another process, so the feed
//! watches the store itself instead of relying on in-process notifications. Each stream keeps
//! its own cursor and ends only when the consumer drops it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::time::{Interval, MissedTickBehavior};

use super::error::StorageResult;
use super::ids::SessionId;
use super::types::{MessageRecord, SessionRevision};
use super::{MessageStore, SessionStore};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    pub poll_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl FeedConfig {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval(self.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }
}

struct MessageCursor<S> {
    store: Arc<S>,
    session_id: SessionId,
    after_seq: u64,
    pending: VecDeque<MessageRecord>,
    ticker: Interval,
}

/// Yields every message of `session_id` inserted after `after_seq`, in insertion order.
///
/// Query failures are yielded as errors and polling continues on the next tick. Rows the store
/// skips as unreadable still move the cursor, so they are read once.
pub fn watch_messages<S>(
    store: Arc<S>,
    session_id: SessionId,
    after_seq: u64,
    config: FeedConfig,
) -> impl Stream<Item = StorageResult<MessageRecord>> + Send + 'static
where
    S: MessageStore + 'static,
{
    let cursor = MessageCursor {
        store,
        session_id,
        after_seq,
        pending: VecDeque::new(),
        ticker: config.ticker(),
    };

    futures::stream::unfold(cursor, |mut cursor| async move {
        loop {
            if let Some(record) = cursor.pending.pop_front() {
                return Some((Ok(record), cursor));
            }

            cursor.ticker.tick().await;
            match cursor
                .store
                .list_messages_after(cursor.session_id, cursor.after_seq)
                .await
            {
                Ok(batch) => {
                    if let Some(last_seq) = batch.last_seq {
                        cursor.after_seq = cursor.after_seq.max(last_seq);
                    }
                    cursor.pending.extend(batch.records);
                }
                Err(error) => return Some((Err(error), cursor)),
            }
        }
    })
}

struct SessionCursor<S> {
    store: Arc<S>,
    last_seen: Option<SessionRevision>,
    ticker: Interval,
}

/// Yields the new revision whenever sessions are created, renamed, touched or deleted.
///
/// The first poll establishes the baseline and is not reported.
pub fn watch_sessions<S>(
    store: Arc<S>,
    config: FeedConfig,
) -> impl Stream<Item = StorageResult<SessionRevision>> + Send + 'static
where
    S: SessionStore + 'static,
{
    let cursor = SessionCursor {
        store,
        last_seen: None,
        ticker: config.ticker(),
    };

    futures::stream::unfold(cursor, |mut cursor| async move {
        loop {
            cursor.ticker.tick().await;
            match cursor.store.session_revision().await {
                Ok(revision) => {
                    let previous = cursor.last_seen.replace(revision);
                    if previous.is_some_and(|previous| previous != revision) {
                        return Some((Ok(revision), cursor));
                    }
                }
                Err(error) => return Some((Err(error), cursor)),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::sqlite::SqliteStorage;
    use crate::types::{NewMessage, NewSession};

    fn fast_feed() -> FeedConfig {
        FeedConfig::new(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn message_feed_reports_only_rows_for_its_session() {
        let store = Arc::new(SqliteStorage::open(":memory:").await.unwrap());
        let watched = store.create_session(NewSession::new("watched")).await.unwrap();
        let other = store.create_session(NewSession::new("other")).await.unwrap();
        store
            .append_message(watched.id, NewMessage::user("already loaded"))
            .await
            .unwrap();

        let feed = watch_messages(store.clone(), watched.id, 1, fast_feed());
        futures::pin_mut!(feed);

        store
            .append_message(other.id, NewMessage::user("elsewhere"))
            .await
            .unwrap();
        store
            .append_message(watched.id, NewMessage::agent("thinking", false))
            .await
            .unwrap();
        store
            .append_message(watched.id, NewMessage::agent("done", true))
            .await
            .unwrap();

        let first = feed.next().await.unwrap().unwrap();
        let second = feed.next().await.unwrap().unwrap();
        assert_eq!(first.content, "thinking");
        assert_eq!(second.content, "done");
        assert!(first.seq < second.seq);
    }

    #[tokio::test]
    async fn unreadable_row_does_not_stall_the_feed() {
        let store = Arc::new(SqliteStorage::open(":memory:").await.unwrap());
        let session = store.create_session(NewSession::new("s")).await.unwrap();

        let feed = watch_messages(store.clone(), session.id, 0, fast_feed());
        futures::pin_mut!(feed);

        sqlx::query(
            "INSERT INTO messages (id, session_id, seq, role, content, metadata, created_at) VALUES (?, ?, 1, 'agent', 'garbled', 'not json', 0)",
        )
        .bind(crate::ids::MessageId::new_v7().to_string())
        .bind(session.id.to_string())
        .execute(store.pool())
        .await
        .unwrap();
        store
            .append_message(session.id, NewMessage::agent("real answer", true))
            .await
            .unwrap();

        let delivered = tokio::time::timeout(Duration::from_secs(5), feed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivered.content, "real answer");
        assert_eq!(delivered.seq, 2);
    }

    #[tokio::test]
    async fn session_feed_fires_after_baseline_changes() {
        let store = Arc::new(SqliteStorage::open(":memory:").await.unwrap());
        let feed = watch_sessions(store.clone(), fast_feed());
        futures::pin_mut!(feed);

        // Let the baseline poll happen before mutating.
        let baseline_store = store.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            baseline_store
                .create_session(NewSession::new("fresh"))
                .await
                .unwrap();
        });

        let revision = tokio::time::timeout(Duration::from_secs(5), feed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(revision.session_count, 1);
        writer.await.unwrap();
    }
}
