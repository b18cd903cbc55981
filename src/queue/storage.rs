//! Durable store for mutations that could not reach the network.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use crate::cache::parse_datetime;
use crate::db;

/// A mutation waiting to be replayed. Never mutated once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
  pub id: String,
  pub payload: Value,
  pub auth_token: String,
  pub created_at: DateTime<Utc>,
}

impl QueueItem {
  pub fn new(payload: Value, auth_token: impl Into<String>) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      payload,
      auth_token: auth_token.into(),
      created_at: Utc::now(),
    }
  }
}

/// Trait for retry queue backends.
pub trait QueueStorage: Send + Sync {
  fn push(&self, item: &QueueItem) -> Result<()>;

  /// All pending items in insertion order.
  fn list(&self) -> Result<Vec<QueueItem>>;

  /// Remove an item after a confirmed replay. Returns false if it was already gone.
  fn remove(&self, id: &str) -> Result<bool>;

  /// Whether the item is still pending.
  fn contains(&self, id: &str) -> Result<bool>;

  fn len(&self) -> Result<usize>;
}

/// SQLite-backed `pendingPosts` collection.
pub struct SqliteQueue {
  conn: Mutex<Connection>,
}

impl SqliteQueue {
  pub fn open(path: &Path) -> Result<Self> {
    Self::with_connection(db::open(path)?)
  }

  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(db::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    db::migrate(&conn, QUEUE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

/// Insertion order is the implicit rowid.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pendingPosts (
    id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    authToken TEXT NOT NULL,
    createdAt TEXT NOT NULL
);
"#;

impl QueueStorage for SqliteQueue {
  fn push(&self, item: &QueueItem) -> Result<()> {
    let conn = db::lock(&self.conn)?;
    let payload = serde_json::to_string(&item.payload)
      .map_err(|e| eyre!("Failed to serialize queued payload: {}", e))?;

    conn
      .execute(
        "INSERT INTO pendingPosts (id, payload, authToken, createdAt) VALUES (?, ?, ?, ?)",
        params![item.id, payload, item.auth_token, item.created_at.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to queue item {}: {}", item.id, e))?;

    Ok(())
  }

  fn list(&self) -> Result<Vec<QueueItem>> {
    let conn = db::lock(&self.conn)?;

    let mut stmt = conn
      .prepare("SELECT id, payload, authToken, createdAt FROM pendingPosts ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list queued items: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read queued item: {}", e))?;

    rows
      .into_iter()
      .map(|(id, payload, auth_token, created_at)| {
        let payload = serde_json::from_str(&payload)
          .map_err(|e| eyre!("Failed to deserialize queued payload {}: {}", id, e))?;
        Ok(QueueItem {
          payload,
          auth_token,
          created_at: parse_datetime(&created_at)?,
          id,
        })
      })
      .collect()
  }

  fn remove(&self, id: &str) -> Result<bool> {
    let conn = db::lock(&self.conn)?;
    let removed = conn
      .execute("DELETE FROM pendingPosts WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued item {}: {}", id, e))?;
    Ok(removed > 0)
  }

  fn contains(&self, id: &str) -> Result<bool> {
    let conn = db::lock(&self.conn)?;
    conn
      .query_row(
        "SELECT 1 FROM pendingPosts WHERE id = ?",
        params![id],
        |_| Ok(()),
      )
      .optional()
      .map(|row| row.is_some())
      .map_err(|e| eyre!("Failed to look up queued item {}: {}", id, e))
  }

  fn len(&self) -> Result<usize> {
    let conn = db::lock(&self.conn)?;
    conn
      .query_row("SELECT COUNT(*) FROM pendingPosts", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count queued items: {}", e))
  }
}
