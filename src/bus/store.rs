//! Message history storage.
//!
//! The bus talks to history through the [`MessageStore`] trait so the
//! in-memory store used by default (and in tests) and the SQLite store are
//! interchangeable.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::message::Message;
use crate::room::RoomId;
use crate::Result;

/// Append-only history for room message streams.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append an accepted message. The caller guarantees `seq` continuity.
    async fn append(&self, message: &Message) -> Result<()>;

    /// Load up to `limit` messages with `seq > after_seq`, in seq order.
    async fn load_after(&self, room_id: RoomId, after_seq: u64, limit: usize)
        -> Result<Vec<Message>>;

    /// Highest seq stored for a room, 0 if the room has no messages.
    async fn last_seq(&self, room_id: RoomId) -> Result<u64>;

    /// Drop all history for a room. Returns the number of messages removed.
    async fn delete_room(&self, room_id: RoomId) -> Result<usize>;
}

/// In-memory message store.
#[derive(Default)]
pub struct MemoryStore {
    streams: RwLock<HashMap<RoomId, Vec<Message>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: &Message) -> Result<()> {
        let mut streams = self.streams.write().await;
        streams
            .entry(message.room_id)
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn load_after(
        &self,
        room_id: RoomId,
        after_seq: u64,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let streams = self.streams.read().await;
        let messages = streams
            .get(&room_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|m| m.seq > after_seq)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(messages)
    }

    async fn last_seq(&self, room_id: RoomId) -> Result<u64> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(&room_id)
            .and_then(|stream| stream.last())
            .map(|m| m.seq)
            .unwrap_or(0))
    }

    async fn delete_room(&self, room_id: RoomId) -> Result<usize> {
        let mut streams = self.streams.write().await;
        Ok(streams.remove(&room_id).map(|s| s.len()).unwrap_or(0))
    }
}

/// SQLite-backed message store.
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "sqlite")]
mod sqlite {
    use std::path::Path;

    use chrono::{DateTime, Utc};
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

    use super::*;
    use crate::auth::IdentityId;
    use crate::bus::{Author, MessageKind};
    use crate::CoreError;

    /// Persistent message store backed by SQLite.
    pub struct SqliteStore {
        pool: SqlitePool,
    }

    /// Database row type for Message.
    #[derive(sqlx::FromRow)]
    struct MessageRow {
        room_id: String,
        seq: i64,
        author_kind: String,
        author_id: Option<String>,
        author_name: String,
        kind: String,
        content: String,
        created_at: String,
    }

    impl MessageRow {
        fn into_message(self) -> Result<Message> {
            let room_id = RoomId::parse(&self.room_id)?;
            let author = match self.author_kind.as_str() {
                "identity" => {
                    let raw = self
                        .author_id
                        .ok_or_else(|| CoreError::Store("author id missing".to_string()))?;
                    Author::Identity {
                        id: IdentityId::parse(&raw)?,
                    }
                }
                "system" => Author::System,
                "ai" => Author::Ai,
                other => {
                    return Err(CoreError::Store(format!("unknown author kind: {other}")));
                }
            };
            let kind = MessageKind::parse(&self.kind)
                .ok_or_else(|| CoreError::Store(format!("unknown message kind: {}", self.kind)))?;
            let created_at = DateTime::parse_from_rfc3339(&self.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());

            Ok(Message {
                room_id,
                seq: self.seq as u64,
                author,
                author_name: self.author_name,
                content: self.content,
                kind,
                created_at,
            })
        }
    }

    fn author_columns(author: &Author) -> (&'static str, Option<String>) {
        match author {
            Author::Identity { id } => ("identity", Some(id.to_string())),
            Author::System => ("system", None),
            Author::Ai => ("ai", None),
        }
    }

    impl SqliteStore {
        /// Open a store at the given path, creating the file if needed.
        pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
            let options = SqliteConnectOptions::new()
                .filename(path.as_ref())
                .create_if_missing(true);

            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?;

            let store = Self { pool };
            store.migrate().await?;
            Ok(store)
        }

        /// Open an in-memory store.
        pub async fn open_in_memory() -> Result<Self> {
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await?;
            let store = Self { pool };
            store.migrate().await?;
            Ok(store)
        }

        async fn migrate(&self) -> Result<()> {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    room_id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    author_kind TEXT NOT NULL,
                    author_id TEXT,
                    author_name TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (room_id, seq)
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl MessageStore for SqliteStore {
        async fn append(&self, message: &Message) -> Result<()> {
            let (author_kind, author_id) = author_columns(&message.author);
            sqlx::query(
                r#"
                INSERT INTO messages
                    (room_id, seq, author_kind, author_id, author_name, kind, content, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(message.room_id.to_string())
            .bind(message.seq as i64)
            .bind(author_kind)
            .bind(author_id)
            .bind(&message.author_name)
            .bind(message.kind.as_str())
            .bind(&message.content)
            .bind(message.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn load_after(
            &self,
            room_id: RoomId,
            after_seq: u64,
            limit: usize,
        ) -> Result<Vec<Message>> {
            let rows = sqlx::query_as::<_, MessageRow>(
                r#"
                SELECT room_id, seq, author_kind, author_id, author_name, kind, content, created_at
                FROM messages
                WHERE room_id = $1 AND seq > $2
                ORDER BY seq ASC
                LIMIT $3
                "#,
            )
            .bind(room_id.to_string())
            .bind(after_seq as i64)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

            rows.into_iter().map(MessageRow::into_message).collect()
        }

        async fn last_seq(&self, room_id: RoomId) -> Result<u64> {
            let seq: Option<i64> =
                sqlx::query_scalar("SELECT MAX(seq) FROM messages WHERE room_id = $1")
                    .bind(room_id.to_string())
                    .fetch_one(&self.pool)
                    .await?;
            Ok(seq.unwrap_or(0) as u64)
        }

        async fn delete_room(&self, room_id: RoomId) -> Result<usize> {
            let result = sqlx::query("DELETE FROM messages WHERE room_id = $1")
                .bind(room_id.to_string())
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::IdentityId;
    use crate::bus::{Author, MessageKind};

    fn text_message(room_id: RoomId, seq: u64, content: &str) -> Message {
        Message::new(
            room_id,
            seq,
            Author::Identity {
                id: IdentityId::new(),
            },
            "Alice",
            content,
            MessageKind::Text,
        )
    }

    #[tokio::test]
    async fn test_memory_append_and_load() {
        let store = MemoryStore::new();
        let room_id = RoomId::new();
        for seq in 1..=5 {
            store
                .append(&text_message(room_id, seq, &format!("msg {seq}")))
                .await
                .unwrap();
        }

        let loaded = store.load_after(room_id, 2, 10).await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].seq, 3);
        assert_eq!(loaded[2].seq, 5);
    }

    #[tokio::test]
    async fn test_memory_load_respects_limit() {
        let store = MemoryStore::new();
        let room_id = RoomId::new();
        for seq in 1..=5 {
            store.append(&text_message(room_id, seq, "x")).await.unwrap();
        }

        let loaded = store.load_after(room_id, 0, 2).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].seq, 1);
        assert_eq!(loaded[1].seq, 2);
    }

    #[tokio::test]
    async fn test_memory_last_seq() {
        let store = MemoryStore::new();
        let room_id = RoomId::new();
        assert_eq!(store.last_seq(room_id).await.unwrap(), 0);

        store.append(&text_message(room_id, 1, "x")).await.unwrap();
        store.append(&text_message(room_id, 2, "y")).await.unwrap();
        assert_eq!(store.last_seq(room_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_memory_rooms_are_isolated() {
        let store = MemoryStore::new();
        let room_a = RoomId::new();
        let room_b = RoomId::new();
        store.append(&text_message(room_a, 1, "a")).await.unwrap();
        store.append(&text_message(room_b, 1, "b")).await.unwrap();

        let loaded = store.load_after(room_a, 0, 10).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "a");
    }

    #[tokio::test]
    async fn test_memory_delete_room() {
        let store = MemoryStore::new();
        let room_id = RoomId::new();
        store.append(&text_message(room_id, 1, "x")).await.unwrap();
        store.append(&text_message(room_id, 2, "y")).await.unwrap();

        assert_eq!(store.delete_room(room_id).await.unwrap(), 2);
        assert_eq!(store.last_seq(room_id).await.unwrap(), 0);
        assert_eq!(store.delete_room(room_id).await.unwrap(), 0);
    }

    #[cfg(feature = "sqlite")]
    mod sqlite_tests {
        use super::*;

        #[tokio::test]
        async fn test_sqlite_append_and_load() {
            let store = SqliteStore::open_in_memory().await.unwrap();
            let room_id = RoomId::new();
            for seq in 1..=3 {
                store
                    .append(&text_message(room_id, seq, &format!("msg {seq}")))
                    .await
                    .unwrap();
            }

            let loaded = store.load_after(room_id, 1, 10).await.unwrap();
            assert_eq!(loaded.len(), 2);
            assert_eq!(loaded[0].seq, 2);
            assert_eq!(loaded[0].content, "msg 2");
            assert_eq!(store.last_seq(room_id).await.unwrap(), 3);
        }

        #[tokio::test]
        async fn test_sqlite_author_roundtrip() {
            let store = SqliteStore::open_in_memory().await.unwrap();
            let room_id = RoomId::new();
            let id = IdentityId::new();
            store
                .append(&Message::new(
                    room_id,
                    1,
                    Author::Identity { id },
                    "Alice",
                    "hi",
                    MessageKind::Text,
                ))
                .await
                .unwrap();
            store
                .append(&Message::new(
                    room_id,
                    2,
                    Author::Ai,
                    crate::bus::AI_AUTHOR_NAME,
                    "hello",
                    MessageKind::Ai,
                ))
                .await
                .unwrap();

            let loaded = store.load_after(room_id, 0, 10).await.unwrap();
            assert_eq!(loaded[0].author, Author::Identity { id });
            assert_eq!(loaded[1].author, Author::Ai);
            assert_eq!(loaded[1].kind, MessageKind::Ai);
        }

        #[tokio::test]
        async fn test_sqlite_open_creates_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("history.db");

            let store = SqliteStore::open(&path).await.unwrap();
            let room_id = RoomId::new();
            store.append(&text_message(room_id, 1, "x")).await.unwrap();

            assert!(path.exists());
            assert_eq!(store.last_seq(room_id).await.unwrap(), 1);
        }

        #[tokio::test]
        async fn test_sqlite_delete_room() {
            let store = SqliteStore::open_in_memory().await.unwrap();
            let room_id = RoomId::new();
            store.append(&text_message(room_id, 1, "x")).await.unwrap();
            assert_eq!(store.delete_room(room_id).await.unwrap(), 1);
            assert_eq!(store.last_seq(room_id).await.unwrap(), 0);
        }
    }
}
