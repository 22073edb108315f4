//! Storage traits and the SQLite implementation behind the worker.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::{Cacheable, Collection, EntityId};
use crate::mutation::{Operation, PendingMutation};

/// A response stored in the versioned asset cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAsset {
  /// Namespace, e.g. `restaurant-reviews-static-v1.0.1`
  pub namespace: String,
  /// Request URL without query string
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

/// Trait for the local entity store and its pending mutation queue.
pub trait EntityStorage: Send + Sync {
  /// All records of a collection.
  fn get_all(&self, collection: Collection) -> Result<Vec<Value>>;

  /// A single record by id.
  fn get(&self, collection: Collection, id: &EntityId) -> Result<Option<Value>>;

  /// Upsert one record under its own id.
  fn put(&self, collection: Collection, record: &Value) -> Result<()>;

  /// Upsert many records in one transaction. Records without an id are skipped.
  fn put_all(&self, collection: Collection, records: &[Value]) -> Result<usize>;

  /// Remove a record. Returns whether it existed.
  fn delete(&self, collection: Collection, id: &EntityId) -> Result<bool>;

  fn get_meta(&self, key: &str) -> Result<Option<String>>;

  fn set_meta(&self, key: &str, value: &str) -> Result<()>;

  /// Append a mutation to the pending queue.
  fn enqueue(&self, mutation: &PendingMutation) -> Result<()>;

  /// Oldest queued mutation, if any.
  fn oldest_pending(&self) -> Result<Option<PendingMutation>>;

  /// All queued mutations, oldest first.
  fn pending(&self) -> Result<Vec<PendingMutation>>;

  fn remove_pending(&self, queue_id: i64) -> Result<bool>;

  fn max_queue_id(&self) -> Result<Option<i64>>;

  /// Drop every record, queued mutation and flag.
  fn reset(&self) -> Result<()>;

  /// Typed view of a collection. Records that don't deserialize are skipped.
  fn load<T: Cacheable>(&self) -> Result<Vec<T>> {
    Ok(
      self
        .get_all(T::collection())?
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect(),
    )
  }
}

/// Trait for the versioned static asset cache.
pub trait AssetStorage: Send + Sync {
  /// First match for a URL across the given namespaces, in order.
  fn match_asset(&self, namespaces: &[String], url: &str) -> Result<Option<CachedAsset>>;

  fn put_asset(&self, asset: &CachedAsset) -> Result<()>;

  /// Store every asset or none of them.
  fn put_assets(&self, assets: &[CachedAsset]) -> Result<()>;

  fn namespaces(&self) -> Result<Vec<String>>;

  /// Delete a namespace and everything in it. Returns the number of entries removed.
  fn delete_namespace(&self, namespace: &str) -> Result<usize>;
}

/// SQLite-backed storage for entities, the pending queue and cached assets.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open worker database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Bring the schema up to the latest version. Each step only adds tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn()?;

    let current: usize = conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read schema version: {}", e))?;

    for (version, step) in MIGRATIONS.iter().enumerate().skip(current) {
      conn
        .execute_batch(step)
        .map_err(|e| eyre!("Failed to run migration {}: {}", version + 1, e))?;
      conn
        .pragma_update(None, "user_version", version + 1)
        .map_err(|e| eyre!("Failed to record schema version: {}", e))?;
    }

    Ok(())
  }
}

/// Schema upgrade steps, applied in order.
const MIGRATIONS: &[&str] = &[
  r#"
CREATE TABLE IF NOT EXISTS restaurants (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS reviews (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
  r#"
CREATE TABLE IF NOT EXISTS pending_queue (
    queue_id INTEGER PRIMARY KEY,
    method TEXT NOT NULL,
    path TEXT NOT NULL,
    entity_id TEXT,
    operation BLOB NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
  r#"
CREATE TABLE IF NOT EXISTS worker_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#,
  r#"
CREATE TABLE IF NOT EXISTS asset_cache (
    namespace TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (namespace, url_hash)
);
"#,
];

fn record_key(record: &Value) -> Result<String> {
  EntityId::of(record)
    .map(|id| id.to_string())
    .ok_or_else(|| eyre!("Record has no usable id: {}", record))
}

/// Stable key for an asset URL.
fn url_hash(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

fn row_to_pending(queue_id: i64, operation: Vec<u8>) -> Result<PendingMutation> {
  let operation: Operation = serde_json::from_slice(&operation)
    .map_err(|e| eyre!("Corrupt queued mutation {}: {}", queue_id, e))?;
  Ok(PendingMutation {
    queue_id,
    operation,
  })
}

impl EntityStorage for SqliteStorage {
  fn get_all(&self, collection: Collection) -> Result<Vec<Value>> {
    let conn = self.conn()?;
    let sql = format!(
      "SELECT data FROM {} ORDER BY CAST(id AS INTEGER), id",
      collection.as_str()
    );

    let mut stmt = conn
      .prepare(&sql)
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let records = stmt
      .query_map([], |row| row.get::<_, Vec<u8>>(0))
      .map_err(|e| eyre!("Failed to query {}: {}", collection, e))?
      .filter_map(|r| r.ok())
      .filter_map(|data| serde_json::from_slice(&data).ok())
      .collect();

    Ok(records)
  }

  fn get(&self, collection: Collection, id: &EntityId) -> Result<Option<Value>> {
    let conn = self.conn()?;
    let sql = format!("SELECT data FROM {} WHERE id = ?", collection.as_str());

    let data: Option<Vec<u8>> = conn
      .query_row(&sql, params![id.to_string()], |row| row.get(0))
      .optional()
      .map_err(|e| eyre!("Failed to read {} {}: {}", collection, id, e))?;

    data
      .map(|d| {
        serde_json::from_slice(&d).map_err(|e| eyre!("Failed to deserialize entity: {}", e))
      })
      .transpose()
  }

  fn put(&self, collection: Collection, record: &Value) -> Result<()> {
    let key = record_key(record)?;
    let data =
      serde_json::to_vec(record).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;

    let conn = self.conn()?;
    conn
      .execute(
        &format!(
          "INSERT OR REPLACE INTO {} (id, data, stored_at) VALUES (?, ?, datetime('now'))",
          collection.as_str()
        ),
        params![key, data],
      )
      .map_err(|e| eyre!("Failed to store entity: {}", e))?;

    Ok(())
  }

  fn put_all(&self, collection: Collection, records: &[Value]) -> Result<usize> {
    let conn = self.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let sql = format!(
      "INSERT OR REPLACE INTO {} (id, data, stored_at) VALUES (?, ?, datetime('now'))",
      collection.as_str()
    );
    let mut stored = 0;
    for record in records {
      let Ok(key) = record_key(record) else {
        continue;
      };
      let data =
        serde_json::to_vec(record).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;
      tx.execute(&sql, params![key, data])
        .map_err(|e| eyre!("Failed to store entity: {}", e))?;
      stored += 1;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(stored)
  }

  fn delete(&self, collection: Collection, id: &EntityId) -> Result<bool> {
    let conn = self.conn()?;
    let removed = conn
      .execute(
        &format!("DELETE FROM {} WHERE id = ?", collection.as_str()),
        params![id.to_string()],
      )
      .map_err(|e| eyre!("Failed to delete {} {}: {}", collection, id, e))?;

    Ok(removed > 0)
  }

  fn get_meta(&self, key: &str) -> Result<Option<String>> {
    let conn = self.conn()?;
    conn
      .query_row(
        "SELECT value FROM worker_meta WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read worker flag {}: {}", key, e))
  }

  fn set_meta(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO worker_meta (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write worker flag {}: {}", key, e))?;
    Ok(())
  }

  fn enqueue(&self, mutation: &PendingMutation) -> Result<()> {
    let operation = serde_json::to_vec(&mutation.operation)
      .map_err(|e| eyre!("Failed to serialize mutation: {}", e))?;
    let entity_id = mutation.operation.entity_id().map(|id| id.to_string());

    let conn = self.conn()?;
    conn
      .execute(
        "INSERT INTO pending_queue (queue_id, method, path, entity_id, operation, queued_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![
          mutation.queue_id,
          mutation.method().as_str(),
          mutation.path(),
          entity_id,
          operation
        ],
      )
      .map_err(|e| eyre!("Failed to queue mutation {}: {}", mutation.queue_id, e))?;

    Ok(())
  }

  fn oldest_pending(&self) -> Result<Option<PendingMutation>> {
    let row: Option<(i64, Vec<u8>)> = {
      let conn = self.conn()?;
      conn
        .query_row(
          "SELECT queue_id, operation FROM pending_queue ORDER BY queue_id LIMIT 1",
          [],
          |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| eyre!("Failed to read pending queue: {}", e))?
    };

    row
      .map(|(queue_id, operation)| row_to_pending(queue_id, operation))
      .transpose()
  }

  fn pending(&self) -> Result<Vec<PendingMutation>> {
    let rows: Vec<(i64, Vec<u8>)> = {
      let conn = self.conn()?;
      let mut stmt = conn
        .prepare("SELECT queue_id, operation FROM pending_queue ORDER BY queue_id")
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
      let rows: Vec<(i64, Vec<u8>)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| eyre!("Failed to read pending queue: {}", e))?
        .filter_map(|r| r.ok())
        .collect();
      rows
    };

    rows
      .into_iter()
      .map(|(queue_id, operation)| row_to_pending(queue_id, operation))
      .collect()
  }

  fn remove_pending(&self, queue_id: i64) -> Result<bool> {
    let conn = self.conn()?;
    let removed = conn
      .execute(
        "DELETE FROM pending_queue WHERE queue_id = ?",
        params![queue_id],
      )
      .map_err(|e| eyre!("Failed to dequeue mutation {}: {}", queue_id, e))?;
    Ok(removed > 0)
  }

  fn max_queue_id(&self) -> Result<Option<i64>> {
    let conn = self.conn()?;
    conn
      .query_row("SELECT MAX(queue_id) FROM pending_queue", [], |row| {
        row.get(0)
      })
      .map_err(|e| eyre!("Failed to read pending queue: {}", e))
  }

  fn reset(&self) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute_batch(
        "DELETE FROM restaurants;
         DELETE FROM reviews;
         DELETE FROM pending_queue;
         DELETE FROM worker_meta;",
      )
      .map_err(|e| eyre!("Failed to reset entity store: {}", e))?;
    Ok(())
  }
}

impl AssetStorage for SqliteStorage {
  fn match_asset(&self, namespaces: &[String], url: &str) -> Result<Option<CachedAsset>> {
    let conn = self.conn()?;
    let hash = url_hash(url);

    for namespace in namespaces {
      let row: Option<(String, u16, String, Vec<u8>, String)> = conn
        .query_row(
          "SELECT url, status, headers, body, cached_at FROM asset_cache
           WHERE namespace = ? AND url_hash = ?",
          params![namespace, hash],
          |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .optional()
        .map_err(|e| eyre!("Failed to query asset cache: {}", e))?;

      if let Some((url, status, headers, body, cached_at)) = row {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Corrupt cached headers for {}: {}", url, e))?;
        let cached_at = DateTime::parse_from_rfc3339(&cached_at)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| eyre!("Failed to parse datetime '{}': {}", cached_at, e))?;

        return Ok(Some(CachedAsset {
          namespace: namespace.clone(),
          url,
          status,
          headers,
          body,
          cached_at,
        }));
      }
    }

    Ok(None)
  }

  fn put_asset(&self, asset: &CachedAsset) -> Result<()> {
    self.put_assets(std::slice::from_ref(asset))
  }

  fn put_assets(&self, assets: &[CachedAsset]) -> Result<()> {
    let conn = self.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for asset in assets {
      let headers = serde_json::to_string(&asset.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
      tx.execute(
        "INSERT OR REPLACE INTO asset_cache (namespace, url_hash, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          asset.namespace,
          url_hash(&asset.url),
          asset.url,
          asset.status,
          headers,
          asset.body,
          asset.cached_at.to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to cache {}: {}", asset.url, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT DISTINCT namespace FROM asset_cache ORDER BY namespace")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache namespaces: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_namespace(&self, namespace: &str) -> Result<usize> {
    let conn = self.conn()?;
    conn
      .execute(
        "DELETE FROM asset_cache WHERE namespace = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to delete cache {}: {}", namespace, e))
  }
}
