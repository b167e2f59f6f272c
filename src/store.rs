//! Durable record of users, groups, memberships and messages.
//!
//! Messages are append-only. Every statement is parameterized and each call
//! acquires a pooled connection for its own duration only.

use std::{str::FromStr, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

use crate::{
    appresult::{ChatError, ChatResult},
    db::{Group, Membership, MessageKind, MessageRow, User},
};

/// Prefixes the one denormalizing select shared by every message read.
macro_rules! message_row_query {
    ($tail:literal) => {
        concat!(
            r#"SELECT m.id, m.group_id, m.user_id, m.content, m.message_type, m.created_at,
                      u.display_name, u.avatar_url, u.is_anonymous
               FROM messages m
               JOIN users u ON m.user_id = u.id "#,
            $tail
        )
    };
}

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        avatar_url TEXT,
        is_anonymous BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
    )"#,
    r#"CREATE TABLE IF NOT EXISTS "groups" (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        avatar_url TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
    )"#,
    r#"CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id INTEGER NOT NULL REFERENCES "groups"(id),
        user_id INTEGER NOT NULL REFERENCES users(id),
        content TEXT NOT NULL CHECK (length(content) > 0),
        message_type TEXT NOT NULL DEFAULT 'text' CHECK (message_type IN ('text', 'system')),
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_messages_group_order ON messages (group_id, created_at, id)"#,
    r#"CREATE TABLE IF NOT EXISTS group_members (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id INTEGER NOT NULL REFERENCES "groups"(id),
        user_id INTEGER NOT NULL REFERENCES users(id),
        joined_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
        UNIQUE (group_id, user_id)
    )"#,
];

const SEED: &[&str] = &[
    r#"INSERT OR IGNORE INTO "groups" (id, name, avatar_url) VALUES
        (1, 'Fun Friday Group', '🎉')"#,
    r#"INSERT OR IGNORE INTO users (id, username, display_name, avatar_url, is_anonymous) VALUES
        (1, 'anonymous1', 'Anonymous', '👤', TRUE),
        (2, 'abhay_shukla', 'Abhay Shukla', '👨‍💼', FALSE),
        (3, 'kirtidan_gadhvi', 'Kirtidan Gadhvi', '👨‍💻', FALSE)"#,
    r#"INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES
        (1, 1), (1, 2), (1, 3)"#,
    r#"INSERT OR IGNORE INTO messages (id, group_id, user_id, content, created_at) VALUES
        (1, 1, 1, 'Someone order Bornvita!!', '2020-08-20 11:35:00'),
        (2, 1, 1, 'hahahahah!!', '2020-08-20 11:38:00'),
        (3, 1, 1, 'I''m Excited For this Event! Ho-Ho', '2020-08-20 11:56:00'),
        (4, 1, 2, 'Hi Guysss 👋', '2020-08-20 12:31:00'),
        (5, 1, 1, 'Hello!', '2020-08-20 12:35:00'),
        (6, 1, 1, 'Yessss!!!!!!!', '2020-08-20 12:42:00'),
        (7, 1, 2, 'Maybe I am not attending this event!', '2020-08-20 13:36:00'),
        (8, 1, 3, 'We have Surprise For you!!', '2020-08-20 11:35:00')"#,
];

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Store {
    pub(crate) db_pool: SqlitePool,
}

impl Store {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    /// Writers queue on the database lock for up to `BUSY_TIMEOUT` instead of
    /// failing fast; WAL keeps readers off the writers' path.
    pub async fn connect(database_url: &str, max_connections: u32) -> ChatResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let db_pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self::new(db_pool))
    }

    /// Single-connection in-memory database with the schema in place.
    ///
    /// The connection is never recycled: closing it would drop the database.
    pub async fn in_memory() -> ChatResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let db_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self::new(db_pool);
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn init_schema(&self) -> ChatResult<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.db_pool).await?;
        }
        Ok(())
    }

    pub async fn seed_sample_data(&self) -> ChatResult<()> {
        let mut tx = self.db_pool.begin().await?;
        for statement in SEED {
            sqlx::query(*statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Appends a message and returns its id.
    ///
    /// One statement checks both references and writes, so the connection
    /// asks for the write lock up front and a rejected call leaves nothing
    /// behind.
    pub async fn insert_message(
        &self,
        group_id: i64,
        user_id: i64,
        content: &str,
        kind: MessageKind,
    ) -> ChatResult<i64> {
        if content.is_empty() {
            return Err(ChatError::Validation("message content is empty".to_owned()));
        }

        let result = sqlx::query(
            r#"INSERT INTO messages (group_id, user_id, content, message_type)
               SELECT ?, ?, ?, ?
               WHERE EXISTS (SELECT 1 FROM "groups" WHERE id = ?)
                 AND EXISTS (SELECT 1 FROM users WHERE id = ?)"#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(content)
        .bind(kind)
        .bind(group_id)
        .bind(user_id)
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.missing_reference(group_id, user_id).await?);
        }
        Ok(result.last_insert_rowid())
    }

    async fn missing_reference(&self, group_id: i64, user_id: i64) -> ChatResult<ChatError> {
        if self.get_group(group_id).await?.is_none() {
            return Ok(ChatError::Reference(format!("group {group_id}")));
        }
        if self.get_user(user_id).await?.is_none() {
            return Ok(ChatError::Reference(format!("user {user_id}")));
        }
        Ok(ChatError::Reference(format!("group {group_id} or user {user_id}")))
    }

    pub async fn get_message_by_id(&self, id: i64) -> ChatResult<Option<MessageRow>> {
        Ok(
            sqlx::query_as(message_row_query!("WHERE m.id = ?"))
                .bind(id)
                .fetch_optional(&self.db_pool)
                .await?
        )
    }

    /// Oldest first; equal timestamps keep insertion order. Unknown groups
    /// simply have no messages.
    pub async fn list_messages_by_group(&self, group_id: i64) -> ChatResult<Vec<MessageRow>> {
        Ok(
            sqlx::query_as(message_row_query!("WHERE m.group_id = ? ORDER BY m.created_at ASC, m.id ASC"))
                .bind(group_id)
                .fetch_all(&self.db_pool)
                .await?
        )
    }

    pub async fn get_group(&self, group_id: i64) -> ChatResult<Option<Group>> {
        Ok(
            sqlx::query_as(r#"SELECT id, name, avatar_url, created_at FROM "groups" WHERE id = ?"#)
                .bind(group_id)
                .fetch_optional(&self.db_pool)
                .await?
        )
    }

    pub async fn get_user(&self, user_id: i64) -> ChatResult<Option<User>> {
        Ok(
            sqlx::query_as("SELECT id, username, display_name, avatar_url, is_anonymous, created_at FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.db_pool)
                .await?
        )
    }

    pub async fn is_member(&self, group_id: i64, user_id: i64) -> ChatResult<bool> {
        let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id)
            .bind(user_id)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(found.is_some())
    }

    pub async fn list_members(&self, group_id: i64) -> ChatResult<Vec<Membership>> {
        Ok(
            sqlx::query_as("SELECT id, group_id, user_id, joined_at FROM group_members WHERE group_id = ? ORDER BY joined_at ASC, id ASC")
                .bind(group_id)
                .fetch_all(&self.db_pool)
                .await?
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_store() -> Store {
        let store = Store::in_memory().await.unwrap();
        store.seed_sample_data().await.unwrap();
        store
    }

    async fn message_count(store: &Store) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(&store.db_pool)
            .await
            .unwrap();
        count
    }

    #[tokio::test]
    async fn seed_history_is_ordered_by_timestamp_then_id() {
        let store = seeded_store().await;

        let rows = store.list_messages_by_group(1).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        assert_eq!(ids, vec![1, 8, 2, 3, 4, 5, 6, 7]);

        assert_eq!(rows[0].created_at, rows[1].created_at);
        assert!(rows.windows(2).all(|pair| pair[0].created_at <= pair[1].created_at));
    }

    #[tokio::test]
    async fn seeding_twice_changes_nothing() {
        let store = seeded_store().await;
        store.seed_sample_data().await.unwrap();

        assert_eq!(message_count(&store).await, 8);
        assert_eq!(store.list_members(1).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids() {
        let store = seeded_store().await;

        let first = store.insert_message(1, 2, "first", MessageKind::Text).await.unwrap();
        let second = store.insert_message(1, 3, "second", MessageKind::System).await.unwrap();
        assert_eq!(first, 9);
        assert!(second > first);

        let row = store.get_message_by_id(second).await.unwrap().unwrap();
        assert_eq!(row.message_type, MessageKind::System);
        assert_eq!(row.display_name, "Kirtidan Gadhvi");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_on_a_file_database_all_succeed() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("chat.db").display());
        let store = Store::connect(&url, 16).await.unwrap();
        store.init_schema().await.unwrap();
        store.seed_sample_data().await.unwrap();

        let handles: Vec<_> = (0..40)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .insert_message(1, 1 + i % 3, &format!("burst {i}"), MessageKind::Text)
                        .await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (9..49).collect::<Vec<i64>>());
        assert_eq!(message_count(&store).await, 48);
    }

    #[tokio::test]
    async fn insert_rejects_unknown_references() {
        let store = seeded_store().await;

        let err = store.insert_message(999, 2, "hi", MessageKind::Text).await.unwrap_err();
        assert!(matches!(err, ChatError::Reference(_)));

        let err = store.insert_message(1, 999, "hi", MessageKind::Text).await.unwrap_err();
        assert!(matches!(err, ChatError::Reference(_)));

        assert_eq!(message_count(&store).await, 8);
    }

    #[tokio::test]
    async fn insert_rejects_empty_content() {
        let store = seeded_store().await;

        let err = store.insert_message(1, 2, "", MessageKind::Text).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert_eq!(message_count(&store).await, 8);
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced_by_the_engine() {
        let store = seeded_store().await;

        let err = sqlx::query("INSERT INTO messages (group_id, user_id, content) VALUES (42, 2, 'orphan')")
            .execute(&store.db_pool)
            .await
            .unwrap_err();
        assert!(matches!(ChatError::from(err), ChatError::Reference(_)));
    }

    #[tokio::test]
    async fn missing_rows_read_as_none_or_empty() {
        let store = seeded_store().await;

        assert!(store.get_group(999).await.unwrap().is_none());
        assert!(store.get_user(999).await.unwrap().is_none());
        assert!(store.get_message_by_id(999).await.unwrap().is_none());
        assert!(store.list_messages_by_group(999).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn denormalized_rows_follow_profile_changes() {
        let store = seeded_store().await;

        sqlx::query("UPDATE users SET display_name = 'Abhay S.' WHERE id = 2")
            .execute(&store.db_pool)
            .await
            .unwrap();

        let row = store.get_message_by_id(4).await.unwrap().unwrap();
        assert_eq!(row.display_name, "Abhay S.");
    }

    #[tokio::test]
    async fn group_and_membership_lookups() {
        let store = seeded_store().await;

        let group = store.get_group(1).await.unwrap().unwrap();
        assert_eq!(group.name, "Fun Friday Group");
        assert_eq!(group.avatar_url.as_deref(), Some("🎉"));

        let user = store.get_user(1).await.unwrap().unwrap();
        assert!(user.is_anonymous);

        assert!(store.is_member(1, 3).await.unwrap());
        assert!(!store.is_member(1, 999).await.unwrap());
    }
}
