//! Cache partition storage trait and backends.
//!
//! A partition is a named bucket of request-key -> response pairs. Partition
//! names embed the deploy version ("static-v2.0.0"), so version garbage
//! collection is just "delete every partition with an unknown name".

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use super::traits::StoredResponse;

/// Trait for cache partition backends.
///
/// Operations are single-key and atomic; concurrent writers to the same key
/// are last-write-wins by design.
pub trait CacheStore: Send + Sync {
  /// Store a response under (partition, key), replacing any existing entry.
  fn put(&self, partition: &str, key: &str, response: &StoredResponse) -> Result<()>;

  /// Look up a response by (partition, key).
  fn get(&self, partition: &str, key: &str) -> Result<Option<StoredResponse>>;

  /// Delete an entire partition and all its entries.
  fn delete_partition(&self, partition: &str) -> Result<()>;

  /// Names of all partitions that currently hold at least one entry.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Number of entries in a partition.
  fn entry_count(&self, partition: &str) -> Result<usize>;

  /// Delete every entry in every partition.
  fn clear_all(&self) -> Result<()>;
}

/// Entry counts per partition, in name order.
pub fn cache_info<S: CacheStore + ?Sized>(store: &S) -> Result<BTreeMap<String, usize>> {
  let mut info = BTreeMap::new();
  for name in store.partition_names()? {
    let count = store.entry_count(&name)?;
    info.insert(name, count);
  }
  Ok(info)
}

/// SQLite-backed cache store.
pub struct SqliteCacheStore {
  conn: Mutex<Connection>,
}

/// Schema for the response cache. Additive only; existing rows survive
/// version upgrades.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    partition TEXT NOT NULL,
    request_key TEXT NOT NULL,
    response BLOB NOT NULL,
    PRIMARY KEY (partition, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_partition
    ON response_cache(partition);
"#;

impl SqliteCacheStore {
  /// Open or create the cache database at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    Self::open_at(&path)
  }

  /// Open or create the cache database at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  /// In-memory store, used by tests and ephemeral instances.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("notesync").join("response_cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

impl CacheStore for SqliteCacheStore {
  fn put(&self, partition: &str, key: &str, response: &StoredResponse) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data =
      serde_json::to_vec(response).map_err(|e| eyre!("Failed to serialize response: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (partition, request_key, response)
         VALUES (?, ?, ?)",
        params![partition, key, data],
      )
      .map_err(|e| eyre!("Failed to store cached response: {}", e))?;

    Ok(())
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<StoredResponse>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT response FROM response_cache WHERE partition = ? AND request_key = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let data: Option<Vec<u8>> = stmt.query_row(params![partition, key], |row| row.get(0)).ok();

    match data {
      Some(bytes) => {
        let response = serde_json::from_slice(&bytes)
          .map_err(|e| eyre!("Failed to deserialize cached response: {}", e))?;
        Ok(Some(response))
      }
      None => Ok(None),
    }
  }

  fn delete_partition(&self, partition: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM response_cache WHERE partition = ?",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to delete partition: {}", e))?;

    Ok(())
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT partition FROM response_cache ORDER BY partition")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query partitions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn entry_count(&self, partition: &str) -> Result<usize> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM response_cache WHERE partition = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;

    Ok(count as usize)
  }

  fn clear_all(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM response_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;

    Ok(())
  }
}

/// In-memory cache store for tests and isolated instances.
#[derive(Default)]
pub struct MemoryCacheStore {
  entries: Mutex<HashMap<(String, String), StoredResponse>>,
}

impl MemoryCacheStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStore for MemoryCacheStore {
  fn put(&self, partition: &str, key: &str, response: &StoredResponse) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert((partition.to_string(), key.to_string()), response.clone());
    Ok(())
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<StoredResponse>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get(&(partition.to_string(), key.to_string())).cloned())
  }

  fn delete_partition(&self, partition: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.retain(|(p, _), _| p != partition);
    Ok(())
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut names: Vec<String> = entries.keys().map(|(p, _)| p.clone()).collect();
    names.sort();
    names.dedup();
    Ok(names)
  }

  fn entry_count(&self, partition: &str) -> Result<usize> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.keys().filter(|(p, _)| p == partition).count())
  }

  fn clear_all(&self) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.clear();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_response(body: &str) -> StoredResponse {
    StoredResponse::new(200, body.as_bytes().to_vec())
  }

  #[test]
  fn test_sqlite_put_get_round_trip() {
    let store = SqliteCacheStore::open_in_memory().unwrap();
    let resp = sample_response(r#"{"notes":[]}"#);

    store.put("api-v2.0.0", "abc", &resp).unwrap();
    let loaded = store.get("api-v2.0.0", "abc").unwrap().unwrap();

    assert_eq!(loaded, resp);
  }

  #[test]
  fn test_sqlite_partition_isolation() {
    let store = SqliteCacheStore::open_in_memory().unwrap();
    store.put("static-v1", "a", &sample_response("1")).unwrap();
    store.put("api-v1", "a", &sample_response("2")).unwrap();

    store.delete_partition("static-v1").unwrap();

    assert!(store.get("static-v1", "a").unwrap().is_none());
    assert!(store.get("api-v1", "a").unwrap().is_some());
  }

  #[test]
  fn test_clear_all_and_info() {
    let store = SqliteCacheStore::open_in_memory().unwrap();
    store.put("static-v1", "a", &sample_response("1")).unwrap();
    store.put("api-v1", "a", &sample_response("2")).unwrap();
    store.put("api-v1", "b", &sample_response("3")).unwrap();

    let info = cache_info(&store).unwrap();
    assert_eq!(info.get("api-v1"), Some(&2));
    assert_eq!(info.get("static-v1"), Some(&1));

    store.clear_all().unwrap();
    assert!(cache_info(&store).unwrap().is_empty());
  }

  #[test]
  fn test_memory_store_matches_sqlite_semantics() {
    let store = MemoryCacheStore::new();
    store.put("dynamic-v1", "k", &sample_response("x")).unwrap();

    assert_eq!(store.entry_count("dynamic-v1").unwrap(), 1);
    assert_eq!(store.partition_names().unwrap(), vec!["dynamic-v1"]);

    store.delete_partition("dynamic-v1").unwrap();
    assert!(store.get("dynamic-v1", "k").unwrap().is_none());
  }
}
