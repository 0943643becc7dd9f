use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::{OptionExt, ResultExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::error::{
    CreateSqliteDirectorySnafu, DecodeMetadataSnafu, EncodeMetadataSnafu, InvariantViolationSnafu,
    NotFoundSnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu,
    SqliteQuerySnafu, StorageError, StorageResult,
};
use super::ids::{MessageId, SessionId};
use super::types::{
    MessageBatch, MessageRecord, MessageRole, NewMessage, NewSession, SessionPatch, SessionRecord,
    SessionRevision,
};
use super::{MessageStore, SessionStore};

const SESSION_COLUMNS: &str = "id, title, created_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, session_id, seq, role, content, content_html, is_final, metadata, created_at";

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    database_url: String,
}

impl SqliteStorage {
    /// Opens (and migrates) a store at a file path, a `sqlite:` URL or `:memory:`.
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // One long-lived connection: an in-memory database lives exactly as long as it does.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::info!("opened sqlite store at {}", database_url);
        Ok(Self { pool, database_url })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    async fn load_session(
        &self,
        session_id: SessionId,
        stage: &'static str,
    ) -> StorageResult<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"
        ))
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context(SqliteQuerySnafu { stage })?;

        row.map(session_row_to_record).transpose()
    }
}

impl SessionStore for SqliteStorage {
    async fn create_session(&self, input: NewSession) -> StorageResult<SessionRecord> {
        let session_id = SessionId::new_v7();
        let now = unix_timestamp_millis();

        sqlx::query("INSERT INTO sessions (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(session_id.to_string())
            .bind(input.title.clone())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "session-create-insert",
            })?;

        let now = i64_to_u64(now, "session-create-timestamp")?;
        Ok(SessionRecord {
            id: session_id,
            title: input.title,
            created_at_unix_millis: now,
            updated_at_unix_millis: now,
        })
    }

    async fn list_sessions(&self) -> StorageResult<Vec<SessionRecord>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY updated_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "session-list-query",
        })?;

        rows.into_iter().map(session_row_to_record).collect()
    }

    async fn get_session(&self, session_id: SessionId) -> StorageResult<Option<SessionRecord>> {
        self.load_session(session_id, "session-get-query").await
    }

    async fn update_session(
        &self,
        session_id: SessionId,
        patch: SessionPatch,
    ) -> StorageResult<SessionRecord> {
        let now = unix_timestamp_millis();
        let update_result =
            sqlx::query("UPDATE sessions SET title = COALESCE(?, title), updated_at = ? WHERE id = ?")
                .bind(patch.title)
                .bind(now)
                .bind(session_id.to_string())
                .execute(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "session-update-apply",
                })?;

        if update_result.rows_affected() == 0 {
            return NotFoundSnafu {
                stage: "session-update-missing",
                entity: "session",
                id: session_id.to_string(),
            }
            .fail();
        }

        self.load_session(session_id, "session-update-load")
            .await?
            .context(NotFoundSnafu {
                stage: "session-update-load-missing",
                entity: "session",
                id: session_id.to_string(),
            })
    }

    async fn delete_session(&self, session_id: SessionId) -> StorageResult<()> {
        // Messages go with the session through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "session-delete-apply",
            })?;

        if result.rows_affected() == 0 {
            return NotFoundSnafu {
                stage: "session-delete-missing",
                entity: "session",
                id: session_id.to_string(),
            }
            .fail();
        }

        Ok(())
    }

    async fn session_revision(&self) -> StorageResult<SessionRevision> {
        let (count, max_updated_at) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COALESCE(MAX(updated_at), 0) FROM sessions",
        )
        .fetch_one(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "session-revision-query",
        })?;

        Ok(SessionRevision {
            session_count: i64_to_u64(count, "session-revision-count")?,
            max_updated_at_unix_millis: i64_to_u64(max_updated_at, "session-revision-updated-at")?,
        })
    }
}

impl MessageStore for SqliteStorage {
    async fn append_message(
        &self,
        session_id: SessionId,
        input: NewMessage,
    ) -> StorageResult<MessageRecord> {
        let metadata_json = serde_json::to_string(&input.metadata).context(EncodeMetadataSnafu {
            stage: "message-append-encode-metadata",
        })?;

        let mut tx = self.pool.begin().await.context(SqliteQuerySnafu {
            stage: "message-append-begin",
        })?;

        let now = unix_timestamp_millis();
        // Touching the session doubles as the existence check and keeps sidebar order fresh.
        let touched = sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-append-touch-session",
            })?;
        if touched.rows_affected() == 0 {
            return NotFoundSnafu {
                stage: "message-append-missing-session",
                entity: "session",
                id: session_id.to_string(),
            }
            .fail();
        }

        let next_seq = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE session_id = ?",
        )
        .bind(session_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .context(SqliteQuerySnafu {
            stage: "message-append-next-seq",
        })?;

        let message_id = MessageId::new_v7();
        sqlx::query(
            "INSERT INTO messages (id, session_id, seq, role, content, content_html, is_final, metadata, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message_id.to_string())
        .bind(session_id.to_string())
        .bind(next_seq)
        .bind(input.role.as_str())
        .bind(input.content.clone())
        .bind(input.content_html.clone())
        .bind(input.is_final)
        .bind(metadata_json)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context(SqliteQuerySnafu {
            stage: "message-append-insert",
        })?;

        tx.commit().await.context(SqliteQuerySnafu {
            stage: "message-append-commit",
        })?;

        Ok(MessageRecord {
            id: message_id,
            session_id,
            seq: i64_to_u64(next_seq, "message-append-seq")?,
            role: input.role,
            content: input.content,
            content_html: input.content_html,
            is_final: input.is_final,
            created_at_unix_millis: i64_to_u64(now, "message-append-created-at")?,
            metadata: input.metadata,
        })
    }

    async fn list_messages(&self, session_id: SessionId) -> StorageResult<Vec<MessageRecord>> {
        Ok(self.list_messages_after(session_id, 0).await?.records)
    }

    async fn list_messages_after(
        &self,
        session_id: SessionId,
        after_seq: u64,
    ) -> StorageResult<MessageBatch> {
        let after_seq = u64_to_i64(after_seq, "message-list-after-seq")?;
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ? AND seq > ? ORDER BY seq ASC"
        ))
        .bind(session_id.to_string())
        .bind(after_seq)
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "message-list-query",
        })?;

        // Rows come from an external writer; one bad row must not hide the rest.
        let mut batch = MessageBatch::default();
        for row in rows {
            let seq = row.seq;
            match message_row_to_record(row) {
                Ok(record) => batch.records.push(record),
                Err(error) => tracing::warn!(
                    "skipping unreadable message at seq {} in session {}: {}",
                    seq,
                    session_id,
                    error
                ),
            }
            batch.last_seq = batch.last_seq.max(u64::try_from(seq).ok());
        }
        Ok(batch)
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: String,
    title: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    session_id: String,
    seq: i64,
    role: String,
    content: String,
    content_html: Option<String>,
    is_final: Option<bool>,
    metadata: String,
    created_at: i64,
}

fn session_row_to_record(row: SessionRow) -> StorageResult<SessionRecord> {
    Ok(SessionRecord {
        id: SessionId::parse(&row.id)?,
        title: row.title,
        created_at_unix_millis: i64_to_u64(row.created_at, "session-row-created-at")?,
        updated_at_unix_millis: i64_to_u64(row.updated_at, "session-row-updated-at")?,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    let metadata = if row.metadata.trim().is_empty() {
        serde_json::Value::Object(Default::default())
    } else {
        serde_json::from_str(&row.metadata).context(DecodeMetadataSnafu {
            stage: "message-row-metadata",
        })?
    };

    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        session_id: SessionId::parse(&row.session_id)?,
        seq: i64_to_u64(row.seq, "message-row-seq")?,
        role: role_from_sql(&row.role)?,
        content: row.content,
        content_html: row.content_html,
        is_final: row.is_final,
        created_at_unix_millis: i64_to_u64(row.created_at, "message-row-created-at")?,
        metadata,
    })
}

fn role_from_sql(raw: &str) -> StorageResult<MessageRole> {
    match raw {
        "user" => Ok(MessageRole::User),
        "agent" => Ok(MessageRole::Agent),
        _ => InvariantViolationSnafu {
            stage: "message-role-from-sql",
            details: format!("unknown message role '{raw}'"),
        }
        .fail(),
    }
}

fn unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_millis() as i64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn u64_to_i64(value: u64, stage: &'static str) -> StorageResult<i64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("u64 '{value}' cannot map to sqlite i64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_SESSION_TITLE;

    async fn memory_store() -> SqliteStorage {
        SqliteStorage::open(":memory:").await.unwrap()
    }

    /// Writes a message row directly, the way an external writer would.
    async fn insert_raw_message(
        store: &SqliteStorage,
        session_id: SessionId,
        seq: i64,
        metadata: &str,
    ) {
        sqlx::query(
            "INSERT INTO messages (id, session_id, seq, role, content, is_final, metadata, created_at) VALUES (?, ?, ?, 'agent', 'garbled', 1, ?, ?)",
        )
        .bind(MessageId::new_v7().to_string())
        .bind(session_id.to_string())
        .bind(seq)
        .bind(metadata)
        .bind(unix_timestamp_millis())
        .execute(store.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn sessions_list_most_recent_first() {
        let store = memory_store().await;
        let older = store.create_session(NewSession::new("older")).await.unwrap();
        let newer = store.create_session(NewSession::new("newer")).await.unwrap();

        // Appending to the older session makes it the most recently updated one.
        tokio::time::sleep(Duration::from_millis(5)).await;
        store
            .append_message(older.id, NewMessage::user("bump"))
            .await
            .unwrap();

        let listed = store.list_sessions().await.unwrap();
        let ids = listed.iter().map(|session| session.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![older.id, newer.id]);
    }

    #[tokio::test]
    async fn update_session_renames_and_missing_session_is_not_found() {
        let store = memory_store().await;
        let session = store
            .create_session(NewSession::new(DEFAULT_SESSION_TITLE))
            .await
            .unwrap();

        let renamed = store
            .update_session(
                session.id,
                SessionPatch {
                    title: Some("Trip planning".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.title, "Trip planning");

        let error = store
            .update_session(SessionId::new_v7(), SessionPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(error, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn messages_keep_insertion_order_and_final_flag() {
        let store = memory_store().await;
        let session = store.create_session(NewSession::new("s")).await.unwrap();

        store
            .append_message(session.id, NewMessage::user("hi"))
            .await
            .unwrap();
        store
            .append_message(session.id, NewMessage::agent("step1", false))
            .await
            .unwrap();
        let answer = NewMessage::agent("answer", true)
            .with_content_html("<p>answer</p>")
            .with_metadata(serde_json::json!({ "source": "automation" }));
        store.append_message(session.id, answer).await.unwrap();

        let messages = store.list_messages(session.id).await.unwrap();
        let contents = messages
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["hi", "step1", "answer"]);
        assert_eq!(
            messages.iter().map(|message| message.seq).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(messages[0].is_final, None);
        assert_eq!(messages[1].is_final, Some(false));
        assert_eq!(messages[2].is_final, Some(true));
        assert_eq!(messages[2].content_html.as_deref(), Some("<p>answer</p>"));
        assert_eq!(messages[2].metadata["source"], "automation");

        let tail = store.list_messages_after(session.id, 2).await.unwrap();
        assert_eq!(tail.records.len(), 1);
        assert_eq!(tail.records[0].content, "answer");
        assert_eq!(tail.last_seq, Some(3));

        let past_end = store.list_messages_after(session.id, 3).await.unwrap();
        assert_eq!(past_end, MessageBatch::default());
    }

    #[tokio::test]
    async fn unreadable_rows_are_skipped_but_counted() {
        let store = memory_store().await;
        let session = store.create_session(NewSession::new("s")).await.unwrap();
        store
            .append_message(session.id, NewMessage::user("question"))
            .await
            .unwrap();
        insert_raw_message(&store, session.id, 2, "not json").await;
        store
            .append_message(session.id, NewMessage::agent("real answer", true))
            .await
            .unwrap();
        insert_raw_message(&store, session.id, 4, "{broken").await;

        let messages = store.list_messages(session.id).await.unwrap();
        let contents = messages
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["question", "real answer"]);

        let tail = store.list_messages_after(session.id, 1).await.unwrap();
        assert_eq!(tail.records.len(), 1);
        assert_eq!(tail.records[0].seq, 3);
        assert_eq!(tail.last_seq, Some(4));
    }

    #[tokio::test]
    async fn deleting_a_session_removes_its_messages() {
        let store = memory_store().await;
        let session = store.create_session(NewSession::new("gone")).await.unwrap();
        store
            .append_message(session.id, NewMessage::user("hello"))
            .await
            .unwrap();

        store.delete_session(session.id).await.unwrap();

        assert!(store.get_session(session.id).await.unwrap().is_none());
        assert!(store.list_messages(session.id).await.unwrap().is_empty());
        assert!(matches!(
            store.delete_session(session.id).await.unwrap_err(),
            StorageError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn appending_to_unknown_session_fails() {
        let store = memory_store().await;
        let error = store
            .append_message(SessionId::new_v7(), NewMessage::user("orphan"))
            .await
            .unwrap_err();
        assert!(matches!(error, StorageError::NotFound { entity: "session", .. }));
    }

    #[tokio::test]
    async fn revision_changes_on_create_and_delete() {
        let store = memory_store().await;
        let empty = store.session_revision().await.unwrap();
        assert_eq!(empty, SessionRevision::default());

        let session = store.create_session(NewSession::new("a")).await.unwrap();
        let after_create = store.session_revision().await.unwrap();
        assert_eq!(after_create.session_count, 1);

        store.delete_session(session.id).await.unwrap();
        let after_delete = store.session_revision().await.unwrap();
        assert_ne!(after_create, after_delete);
    }

    #[test]
    fn database_locations_normalize_to_urls() {
        assert_eq!(normalize_database_url(":memory:"), "sqlite::memory:");
        assert_eq!(
            normalize_database_url("sqlite://already.db"),
            "sqlite://already.db"
        );
        assert_eq!(normalize_database_url("data/chat.db"), "sqlite://data/chat.db");
    }
}
