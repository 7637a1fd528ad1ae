//! Chat persistence.
//!
//! `ChatStore` is the only contract the engine uses to load and save chats
//! and per-user settings. `SqliteChatStore` keeps chats as JSON rows;
//! `MemoryChatStore` keeps everything in process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;

use crate::chat::{Chat, ChatMetadata};
use crate::core::errors::EngineError;

const SCHEMA_VERSION: i64 = 1;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get_chat(&self, id: &str) -> Result<Option<Chat>, EngineError>;
    async fn save_chat(&self, chat: &Chat) -> Result<(), EngineError>;
    async fn delete_chat(&self, id: &str) -> Result<(), EngineError>;
    /// Newest first.
    async fn list_chat_metadata(&self) -> Result<Vec<ChatMetadata>, EngineError>;
    async fn get_config(&self, key: &str) -> Result<Option<Value>, EngineError>;
    async fn set_config(&self, key: &str, value: Value) -> Result<(), EngineError>;
}

#[derive(Debug, Clone)]
pub struct SqliteChatStore {
    db_path: PathBuf,
    pool: SqlitePool,
}

impl SqliteChatStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, EngineError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::persistence("open", e))?;
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(connect_options)
            .await
            .map_err(|e| EngineError::persistence("open", e))?;

        let store = Self { db_path, pool };
        store.init_db().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn init_db(&self) -> Result<(), EngineError> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::persistence("init", e))?;

        if version == SCHEMA_VERSION {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::persistence("init", e))?;

        sqlx::query(
            "\
            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL DEFAULT '',
                time_of_last_message TEXT NOT NULL,
                body TEXT NOT NULL
            )",
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| EngineError::persistence("init", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chats_last_message ON chats(time_of_last_message DESC)",
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| EngineError::persistence("init", e))?;

        sqlx::query(
            "\
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| EngineError::persistence("init", e))?;

        let pragma = format!("PRAGMA user_version = {}", SCHEMA_VERSION);
        sqlx::query(&pragma)
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::persistence("init", e))?;

        tx.commit()
            .await
            .map_err(|e| EngineError::persistence("init", e))?;
        Ok(())
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn get_chat(&self, id: &str) -> Result<Option<Chat>, EngineError> {
        let row = sqlx::query("SELECT body FROM chats WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::persistence("get_chat", e))?;

        row.map(|row| {
            let body: String = row.get("body");
            serde_json::from_str(&body).map_err(|e| EngineError::persistence("get_chat", e))
        })
        .transpose()
    }

    async fn save_chat(&self, chat: &Chat) -> Result<(), EngineError> {
        let body =
            serde_json::to_string(chat).map_err(|e| EngineError::persistence("save_chat", e))?;

        sqlx::query(
            "\
            INSERT INTO chats (id, display_name, time_of_last_message, body)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                time_of_last_message = excluded.time_of_last_message,
                body = excluded.body",
        )
        .bind(&chat.id)
        .bind(&chat.display_name)
        .bind(
            chat.time_of_last_message
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
        )
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::persistence("save_chat", e))?;

        tracing::debug!(chat_id = %chat.id, messages = chat.messages.len(), "Saved chat");
        Ok(())
    }

    async fn delete_chat(&self, id: &str) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM chats WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::persistence("delete_chat", e))?;
        Ok(())
    }

    async fn list_chat_metadata(&self) -> Result<Vec<ChatMetadata>, EngineError> {
        let rows = sqlx::query(
            "SELECT id, display_name, time_of_last_message FROM chats ORDER BY time_of_last_message DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::persistence("list_chat_metadata", e))?;

        rows.into_iter()
            .map(|row| {
                let stamp: String = row.get("time_of_last_message");
                let time_of_last_message = DateTime::parse_from_rfc3339(&stamp)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| EngineError::persistence("list_chat_metadata", e))?;
                Ok(ChatMetadata {
                    id: row.get("id"),
                    display_name: row.get("display_name"),
                    time_of_last_message,
                })
            })
            .collect()
    }

    async fn get_config(&self, key: &str) -> Result<Option<Value>, EngineError> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::persistence("get_config", e))?;

        row.map(|row| {
            let raw: String = row.get("value");
            serde_json::from_str(&raw).map_err(|e| EngineError::persistence("get_config", e))
        })
        .transpose()
    }

    async fn set_config(&self, key: &str, value: Value) -> Result<(), EngineError> {
        let raw =
            serde_json::to_string(&value).map_err(|e| EngineError::persistence("set_config", e))?;
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(raw)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::persistence("set_config", e))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryChatStore {
    chats: RwLock<HashMap<String, Chat>>,
    settings: RwLock<HashMap<String, Value>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn get_chat(&self, id: &str) -> Result<Option<Chat>, EngineError> {
        Ok(self.chats.read().await.get(id).cloned())
    }

    async fn save_chat(&self, chat: &Chat) -> Result<(), EngineError> {
        self.chats
            .write()
            .await
            .insert(chat.id.clone(), chat.clone());
        Ok(())
    }

    async fn delete_chat(&self, id: &str) -> Result<(), EngineError> {
        self.chats.write().await.remove(id);
        Ok(())
    }

    async fn list_chat_metadata(&self) -> Result<Vec<ChatMetadata>, EngineError> {
        let mut metadata: Vec<ChatMetadata> =
            self.chats.read().await.values().map(Chat::metadata).collect();
        metadata.sort_by(|a, b| b.time_of_last_message.cmp(&a.time_of_last_message));
        Ok(metadata)
    }

    async fn get_config(&self, key: &str) -> Result<Option<Value>, EngineError> {
        Ok(self.settings.read().await.get(key).cloned())
    }

    async fn set_config(&self, key: &str, value: Value) -> Result<(), EngineError> {
        self.settings.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Message;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn chat_at(name: &str, minutes_ago: i64) -> Chat {
        let mut chat = Chat::new();
        chat.push_message(Message::user(name));
        chat.time_of_last_message = Utc::now() - ChronoDuration::minutes(minutes_ago);
        chat
    }

    async fn exercise(store: &dyn ChatStore) {
        let older = chat_at("older", 10);
        let newer = chat_at("newer", 1);
        store.save_chat(&older).await.unwrap();
        store.save_chat(&newer).await.unwrap();

        let loaded = store.get_chat(&older.id).await.unwrap().unwrap();
        assert_eq!(loaded.messages, older.messages);
        assert_eq!(loaded.display_name, "older");

        let listed = store.list_chat_metadata().await.unwrap();
        let names: Vec<&str> = listed.iter().map(|m| m.display_name.as_str()).collect();
        assert_eq!(names, vec!["newer", "older"]);

        store.delete_chat(&older.id).await.unwrap();
        assert!(store.get_chat(&older.id).await.unwrap().is_none());

        assert!(store.get_config("default_llm").await.unwrap().is_none());
        store
            .set_config("default_llm", json!("llama3"))
            .await
            .unwrap();
        store
            .set_config("default_llm", json!("gpt-4o"))
            .await
            .unwrap();
        assert_eq!(
            store.get_config("default_llm").await.unwrap(),
            Some(json!("gpt-4o"))
        );
    }

    #[tokio::test]
    async fn memory_store_honours_contract() {
        exercise(&MemoryChatStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_honours_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteChatStore::new(dir.path().join("chats.db"))
            .await
            .unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chats.db");
        let chat = chat_at("persisted", 0);
        {
            let store = SqliteChatStore::new(path.clone()).await.unwrap();
            store.save_chat(&chat).await.unwrap();
        }
        let store = SqliteChatStore::new(path).await.unwrap();
        assert_eq!(store.get_chat(&chat.id).await.unwrap(), Some(chat));
    }
}
