//! Conversation store: one context row per thread plus an append-only
//! message log.

use crate::context::model::{ChatMessage, ConversationContext, Role};
use crate::error::{CostwiseError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationContext>>;

    /// Replace the thread's context.
    async fn save(&self, thread_id: &str, context: &ConversationContext) -> Result<()>;

    async fn append_message(&self, thread_id: &str, message: &ChatMessage) -> Result<()>;

    /// Up to `limit` most recent messages, oldest first.
    async fn recent_messages(&self, thread_id: &str, limit: usize) -> Result<Vec<ChatMessage>>;
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    contexts: DashMap<String, ConversationContext>,
    messages: DashMap<String, Vec<ChatMessage>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationContext>> {
        Ok(self.contexts.get(thread_id).map(|c| c.value().clone()))
    }

    async fn save(&self, thread_id: &str, context: &ConversationContext) -> Result<()> {
        self.contexts.insert(thread_id.to_string(), context.clone());
        Ok(())
    }

    async fn append_message(&self, thread_id: &str, message: &ChatMessage) -> Result<()> {
        self.messages
            .entry(thread_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn recent_messages(&self, thread_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        Ok(self
            .messages
            .get(thread_id)
            .map(|log| {
                let skip = log.len().saturating_sub(limit);
                log[skip..].to_vec()
            })
            .unwrap_or_default())
    }
}

/// rusqlite is blocking: every statement runs on tokio's blocking pool.
pub struct SqliteConversationStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteConversationStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(path)
            .map_err(|e| CostwiseError::Store(format!("Failed to open database {}: {}", path.display(), e)))?;
        init_schema(&db)?;
        info!(path = %path.display(), "conversation store opened");
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()
            .map_err(|e| CostwiseError::Store(format!("Failed to open in-memory database: {}", e)))?;
        init_schema(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| CostwiseError::Store("database lock poisoned".to_string()))?;
            op(&conn)
        })
        .await
        .map_err(|e| CostwiseError::Store(format!("database task failed: {}", e)))?
    }
}

fn init_schema(db: &Connection) -> Result<()> {
    db.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS contexts (
            thread_id TEXT PRIMARY KEY,
            context_json TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id TEXT NOT NULL,
            role TEXT NOT NULL,
            text TEXT NOT NULL,
            at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, id);
        "#,
    )
    .map_err(|e| CostwiseError::Store(format!("Failed to create schema: {}", e)))?;
    Ok(())
}

fn read_messages(db: &Connection, thread_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
    let mut stmt = db.prepare("SELECT role, text, at FROM messages WHERE thread_id = ?1 ORDER BY id DESC LIMIT ?2")?;
    let rows = stmt.query_map(params![thread_id, limit as i64], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
    })?;

    let mut messages = Vec::new();
    for row in rows {
        let (role, text, at) = row?;
        let role = Role::parse(&role).ok_or_else(|| CostwiseError::Store(format!("unknown message role '{}'", role)))?;
        let at = DateTime::parse_from_rfc3339(&at)
            .map_err(|e| CostwiseError::Store(format!("bad message timestamp '{}': {}", at, e)))?
            .with_timezone(&Utc);
        messages.push(ChatMessage { role, text, at });
    }
    messages.reverse();
    Ok(messages)
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationContext>> {
        let thread_id = thread_id.to_string();
        let json: Option<String> = self
            .with_conn(move |db| {
                Ok(db
                    .query_row(
                        "SELECT context_json FROM contexts WHERE thread_id = ?1",
                        params![thread_id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, thread_id: &str, context: &ConversationContext) -> Result<()> {
        let json = serde_json::to_string(context)?;
        let updated_at = context.updated_at.to_rfc3339();
        let key = thread_id.to_string();
        self.with_conn(move |db| {
            db.execute(
                r#"
                INSERT INTO contexts (thread_id, context_json, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(thread_id) DO UPDATE SET context_json = excluded.context_json,
                                                     updated_at = excluded.updated_at
                "#,
                params![key, json, updated_at],
            )?;
            Ok(())
        })
        .await?;
        debug!(thread_id, turn = context.turn_count, "context saved");
        Ok(())
    }

    async fn append_message(&self, thread_id: &str, message: &ChatMessage) -> Result<()> {
        let thread_id = thread_id.to_string();
        let message = message.clone();
        self.with_conn(move |db| {
            db.execute(
                "INSERT INTO messages (thread_id, role, text, at) VALUES (?1, ?2, ?3, ?4)",
                params![thread_id, message.role.as_str(), message.text, message.at.to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn recent_messages(&self, thread_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |db| read_messages(db, &thread_id, limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ResolvedParams;
    use crate::ups::schema::IntentType;

    async fn exercise(store: &dyn ConversationStore) {
        let now = Utc::now();
        assert!(store.load("t1").await.unwrap().is_none());

        let ctx = ConversationContext::new("t1", now).advanced(ResolvedParams::new(IntentType::TopNRanking), now);
        store.save("t1", &ctx).await.unwrap();
        let next = ctx.advanced(ResolvedParams::new(IntentType::CostTrend), now);
        store.save("t1", &next).await.unwrap();
        let loaded = store.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.turn_count, 2);
        assert_eq!(loaded.resolved_params.unwrap().intent_type, IntentType::CostTrend);

        for i in 0..5 {
            store
                .append_message("t1", &ChatMessage::user(format!("m{}", i), now))
                .await
                .unwrap();
        }
        store.append_message("t2", &ChatMessage::user("other", now)).await.unwrap();
        let recent = store.recent_messages("t1", 3).await.unwrap();
        let texts: Vec<&str> = recent.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        exercise(&InMemoryConversationStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        exercise(&SqliteConversationStore::in_memory().unwrap()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sqlite_store_concurrent_threads() {
        let store = Arc::new(SqliteConversationStore::in_memory().unwrap());
        let now = Utc::now();
        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let thread = format!("t{}", i % 2);
                    store
                        .append_message(&thread, &ChatMessage::user(format!("m{}", i), now))
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }
        assert_eq!(store.recent_messages("t0", 10).await.unwrap().len(), 4);
        assert_eq!(store.recent_messages("t1", 10).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threads.db");
        let now = Utc::now();
        {
            let store = SqliteConversationStore::open(&path).unwrap();
            let ctx = ConversationContext::new("t9", now).advanced(ResolvedParams::new(IntentType::Governance), now);
            store.save("t9", &ctx).await.unwrap();
        }
        let store = SqliteConversationStore::open(&path).unwrap();
        assert_eq!(store.load("t9").await.unwrap().unwrap().turn_count, 1);
    }
}
