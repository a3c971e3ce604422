//! SQLite implementation of the cache store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheStore, PartitionInfo};
use crate::net::{CacheKey, Response, ResponseKind};

/// SQLite-based cache store.
///
/// Insertion order is the `seq` column: every put allocates a fresh value, so a
/// replaced entry sorts after everything already stored.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    partition TEXT NOT NULL REFERENCES partitions(name) ON DELETE CASCADE,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    kind TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (partition, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_partition_seq ON entries(partition, seq);
"#;

/// SHA256 of the request key, for stable fixed-length lookups.
fn key_hash(key: &CacheKey) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

fn ensure_partition(conn: &Connection, name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to create partition {}: {}", name, e))?;
  Ok(())
}

fn insert_entry(conn: &Connection, partition: &str, key: &CacheKey, response: &Response) -> Result<()> {
  let hash = key_hash(key);
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "DELETE FROM entries WHERE partition = ? AND key_hash = ?",
      params![partition, hash],
    )
    .map_err(|e| eyre!("Failed to replace entry {}: {}", key, e))?;

  conn
    .execute(
      "INSERT INTO entries (partition, key_hash, request_key, status, status_text, kind, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        partition,
        hash,
        key.as_str(),
        response.status,
        response.status_text,
        response.kind.as_str(),
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;

  Ok(())
}

impl CacheStore for SqliteStore {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self.conn()?;
    ensure_partition(&conn, name)
  }

  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<Response>> {
    let conn = self.conn()?;

    let row: Option<(u16, String, String, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, status_text, kind, headers, body FROM entries
         WHERE partition = ? AND key_hash = ?",
        params![partition, key_hash(key)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    match row {
      Some((status, status_text, kind, headers, body)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key, e))?;
        Ok(Some(Response {
          status,
          status_text,
          headers,
          body,
          kind: ResponseKind::parse(&kind)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, partition: &str, key: &CacheKey, response: &Response) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_partition(&tx, partition)?;
    insert_entry(&tx, partition, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn put_all(&self, partition: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_partition(&tx, partition)?;
    for (key, response) in entries {
      insert_entry(&tx, partition, key, response)?;
    }

    // Dropping an uncommitted transaction rolls it back
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool> {
    let conn = self.conn()?;
    let removed = conn
      .execute(
        "DELETE FROM entries WHERE partition = ? AND key_hash = ?",
        params![partition, key_hash(key)],
      )
      .map_err(|e| eyre!("Failed to delete {}: {}", key, e))?;

    Ok(removed > 0)
  }

  fn keys(&self, partition: &str) -> Result<Vec<CacheKey>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT request_key FROM entries WHERE partition = ? ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare key listing: {}", e))?;

    let keys = stmt
      .query_map(params![partition], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list keys of {}: {}", partition, e))?
      .map(|r| r.map(CacheKey::from))
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read keys of {}: {}", partition, e))?;

    Ok(keys)
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare partition listing: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partitions: {}", e))?;

    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE partition = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn partition_info(&self) -> Result<Vec<PartitionInfo>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT p.name, p.created_at, COUNT(e.seq) FROM partitions p
         LEFT JOIN entries e ON e.partition = p.name
         GROUP BY p.name
         ORDER BY p.created_at, p.name",
      )
      .map_err(|e| eyre!("Failed to prepare partition summary: {}", e))?;

    let rows: Vec<(String, String, i64)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to summarize partitions: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read partition summary: {}", e))?;

    rows
      .into_iter()
      .map(|(name, created_at, entries)| {
        Ok(PartitionInfo {
          name,
          entries: entries as usize,
          created_at: parse_datetime(&created_at)?,
        })
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
