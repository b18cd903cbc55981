//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::entry::CacheEntry;
use crate::db;

/// Trait for cache storage backends.
///
/// Storage is organized in named namespaces; a namespace is the unit of
/// eviction. Writes are last-write-wins per (namespace, key).
pub trait CacheStorage: Send + Sync {
  /// Create the namespace if it does not exist yet.
  fn open(&self, namespace: &str) -> Result<()>;

  /// Look up an entry by request key.
  fn match_key(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>>;

  /// Store an entry, replacing any previous one under the same key.
  fn put(&self, namespace: &str, key: &str, entry: &CacheEntry) -> Result<()>;

  /// Store several entries in one transaction: either all land or none do.
  fn put_all(&self, namespace: &str, entries: &[(String, CacheEntry)]) -> Result<()>;

  /// Names of all namespaces, oldest first.
  fn list_namespaces(&self) -> Result<Vec<String>>;

  /// Drop a namespace and every entry in it. Returns false if it did not exist.
  fn delete(&self, namespace: &str) -> Result<bool>;

  /// Record the namespace that was last activated.
  fn set_active(&self, namespace: &str) -> Result<()>;

  /// The namespace recorded by the last activation, if any.
  fn active(&self) -> Result<Option<String>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache tables in the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    Self::with_connection(db::open(path)?)
  }

  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(db::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    db::migrate(&conn, CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_namespaces (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- Response snapshots (headers stored as JSON)
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (namespace, request_key)
);

CREATE TABLE IF NOT EXISTS cache_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const ACTIVE_KEY: &str = "active_namespace";

fn ensure_namespace(conn: &Connection, namespace: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_namespaces (name, created_at) VALUES (?, ?)",
      params![namespace, Utc::now().to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to create namespace {}: {}", namespace, e))?;
  Ok(())
}

fn insert_entry(conn: &Connection, namespace: &str, key: &str, entry: &CacheEntry) -> Result<()> {
  let headers =
    serde_json::to_string(&entry.headers).map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (namespace, request_key, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        namespace,
        key,
        entry.url,
        entry.status,
        headers,
        entry.body,
        entry.cached_at.to_rfc3339()
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;
  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, namespace: &str) -> Result<()> {
    let conn = db::lock(&self.conn)?;
    ensure_namespace(&conn, namespace)
  }

  fn match_key(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
    let conn = db::lock(&self.conn)?;

    let row: Option<(String, u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT url, status, headers, body, cached_at FROM cache_entries
         WHERE namespace = ? AND request_key = ?",
        params![namespace, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache: {}", e))?;

    match row {
      Some((url, status, headers, body, cached_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
        Ok(Some(CacheEntry {
          url,
          status,
          headers,
          body,
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, namespace: &str, key: &str, entry: &CacheEntry) -> Result<()> {
    let conn = db::lock(&self.conn)?;
    ensure_namespace(&conn, namespace)?;
    insert_entry(&conn, namespace, key, entry)
  }

  fn put_all(&self, namespace: &str, entries: &[(String, CacheEntry)]) -> Result<()> {
    let mut conn = db::lock(&self.conn)?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_namespace(&tx, namespace)?;
    for (key, entry) in entries {
      insert_entry(&tx, namespace, key, entry)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn list_namespaces(&self) -> Result<Vec<String>> {
    let conn = db::lock(&self.conn)?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_namespaces ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read namespace row: {}", e))?;

    Ok(names)
  }

  fn delete(&self, namespace: &str) -> Result<bool> {
    let mut conn = db::lock(&self.conn)?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE namespace = ?",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to delete cache entries: {}", e))?;
    let removed = tx
      .execute(
        "DELETE FROM cache_namespaces WHERE name = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to delete namespace: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(removed > 0)
  }

  fn set_active(&self, namespace: &str) -> Result<()> {
    let conn = db::lock(&self.conn)?;
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_state (key, value) VALUES (?, ?)",
        params![ACTIVE_KEY, namespace],
      )
      .map_err(|e| eyre!("Failed to record active namespace: {}", e))?;
    Ok(())
  }

  fn active(&self) -> Result<Option<String>> {
    let conn = db::lock(&self.conn)?;
    conn
      .query_row(
        "SELECT value FROM cache_state WHERE key = ?",
        params![ACTIVE_KEY],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read active namespace: {}", e))
  }
}

/// Parse an RFC 3339 timestamp written by this module.
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
