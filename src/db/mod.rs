//! Offline record store: indexed local persistence for notes, folders and
//! todos, plus the pending-sync queue, settings, and cache metadata with
//! expiry.
//!
//! Availability is checked once, at construction: if the database cannot be
//! opened every later operation would fail, so `open` is the single point
//! of failure. Schema setup is idempotent and additive only.

pub mod schema;

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::records::{LocalRecord, RecordKind, StoredRecord, SyncQueueItem, SyncStatus};

/// Default TTL for cache metadata entries (5 minutes).
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(300);

/// A point-in-time export of the user-visible tables, for backup/restore.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
  pub version: u32,
  /// Epoch milliseconds when the export was taken
  pub timestamp: i64,
  /// Table name -> raw record bodies
  pub data: BTreeMap<String, Vec<serde_json::Value>>,
}

/// Offline database wrapper.
pub struct OfflineStore {
  conn: Mutex<Connection>,
}

impl OfflineStore {
  /// Open or create the offline database at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    Self::open_at(&path)
  }

  /// Open or create the offline database at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path).map_err(|e| {
      eyre!(
        "Offline storage unavailable at {}: {}",
        path.display(),
        e
      )
    })?;
    Self::from_connection(conn)
  }

  /// In-memory store for tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Offline storage unavailable in memory: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("notesync").join("offline.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run offline storage migrations: {}", e))?;

    Ok(())
  }

  // ==========================================================================
  // Generic record operations
  // ==========================================================================

  /// Upsert a record.
  ///
  /// Stamps `last_modified` with now and unconditionally marks the record
  /// pending; call [`mark_synced`](Self::mark_synced) after a confirmed
  /// server round-trip.
  pub fn put_record<T: LocalRecord>(&self, record: &T) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let table = T::kind().table();

    let data =
      serde_json::to_string(record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

    conn
      .execute(
        &format!(
          "INSERT OR REPLACE INTO {} (id, user_id, secondary, data, last_modified, sync_status)
           VALUES (?, ?, ?, ?, ?, ?)",
          table
        ),
        params![
          record.record_id(),
          record.user_id(),
          record.secondary_key(),
          data,
          now_millis(),
          SyncStatus::Pending.as_str()
        ],
      )
      .map_err(|e| eyre!("Failed to store record: {}", e))?;

    Ok(())
  }

  /// Get a single record by id.
  pub fn get_record<T: LocalRecord>(&self, id: &str) -> Result<Option<StoredRecord<T>>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let table = T::kind().table();

    let mut stmt = conn
      .prepare(&format!(
        "SELECT data, last_modified, sync_status FROM {} WHERE id = ?",
        table
      ))
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, i64, String)> = stmt
      .query_row(params![id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .ok();

    match row {
      Some((data, last_modified, status)) => Ok(Some(StoredRecord {
        record: serde_json::from_str(&data)
          .map_err(|e| eyre!("Failed to deserialize record: {}", e))?,
        last_modified,
        sync_status: SyncStatus::parse(&status),
      })),
      None => Ok(None),
    }
  }

  /// All records of a kind for one user.
  pub fn records_for_user<T: LocalRecord>(&self, user_id: &str) -> Result<Vec<StoredRecord<T>>> {
    self.query_records("user_id = ?", params![user_id])
  }

  /// All records of a kind grouped under a secondary key (folder for notes,
  /// parent for folders).
  pub fn records_by_secondary<T: LocalRecord>(&self, value: &str) -> Result<Vec<StoredRecord<T>>> {
    self.query_records("secondary = ?", params![value])
  }

  /// Every record of a kind.
  pub fn all_records<T: LocalRecord>(&self) -> Result<Vec<StoredRecord<T>>> {
    self.query_records("1 = 1", params![])
  }

  /// Records still awaiting a confirmed server round-trip.
  pub fn pending_records<T: LocalRecord>(&self) -> Result<Vec<StoredRecord<T>>> {
    self.query_records("sync_status = 'pending'", params![])
  }

  fn query_records<T: LocalRecord>(
    &self,
    filter: &str,
    filter_params: impl rusqlite::Params,
  ) -> Result<Vec<StoredRecord<T>>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let table = T::kind().table();

    let mut stmt = conn
      .prepare(&format!(
        "SELECT data, last_modified, sync_status FROM {} WHERE {} ORDER BY last_modified DESC",
        table, filter
      ))
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, i64, String)> = stmt
      .query_map(filter_params, |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| eyre!("Failed to query records: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut records = Vec::with_capacity(rows.len());
    for (data, last_modified, status) in rows {
      records.push(StoredRecord {
        record: serde_json::from_str(&data)
          .map_err(|e| eyre!("Failed to deserialize record: {}", e))?,
        last_modified,
        sync_status: SyncStatus::parse(&status),
      });
    }

    Ok(records)
  }

  /// Delete a record by id. The only sanctioned way a pending record
  /// disappears without being synced.
  pub fn delete_record(&self, kind: RecordKind, id: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        &format!("DELETE FROM {} WHERE id = ?", kind.table()),
        params![id],
      )
      .map_err(|e| eyre!("Failed to delete record: {}", e))?;

    Ok(())
  }

  /// Delete every record of a kind.
  pub fn clear_records(&self, kind: RecordKind) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(&format!("DELETE FROM {}", kind.table()), [])
      .map_err(|e| eyre!("Failed to clear records: {}", e))?;

    Ok(())
  }

  /// Number of records of a kind.
  pub fn count_records(&self, kind: RecordKind) -> Result<usize> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    self.count_table(&conn, kind.table())
  }

  fn count_table(&self, conn: &Connection, table: &str) -> Result<usize> {
    let count: i64 = conn
      .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
      })
      .map_err(|e| eyre!("Failed to count {}: {}", table, e))?;
    Ok(count as usize)
  }

  /// Flip a record to synced after a confirmed server round-trip, without
  /// re-stamping `last_modified`.
  pub fn mark_synced(&self, kind: RecordKind, id: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        &format!("UPDATE {} SET sync_status = 'synced' WHERE id = ?", kind.table()),
        params![id],
      )
      .map_err(|e| eyre!("Failed to mark record synced: {}", e))?;

    Ok(())
  }

  // ==========================================================================
  // Domain convenience wrappers
  // ==========================================================================

  pub fn save_note(&self, note: &crate::records::Note) -> Result<()> {
    self.put_record(note)
  }

  pub fn get_note(&self, id: &str) -> Result<Option<StoredRecord<crate::records::Note>>> {
    self.get_record(id)
  }

  pub fn notes_for_user(&self, user_id: &str) -> Result<Vec<StoredRecord<crate::records::Note>>> {
    self.records_for_user(user_id)
  }

  pub fn notes_in_folder(&self, folder_id: &str) -> Result<Vec<StoredRecord<crate::records::Note>>> {
    self.records_by_secondary(folder_id)
  }

  pub fn delete_note(&self, id: &str) -> Result<()> {
    self.delete_record(RecordKind::Note, id)
  }

  pub fn save_folder(&self, folder: &crate::records::Folder) -> Result<()> {
    self.put_record(folder)
  }

  pub fn get_folder(&self, id: &str) -> Result<Option<StoredRecord<crate::records::Folder>>> {
    self.get_record(id)
  }

  pub fn folders_for_user(
    &self,
    user_id: &str,
  ) -> Result<Vec<StoredRecord<crate::records::Folder>>> {
    self.records_for_user(user_id)
  }

  pub fn delete_folder(&self, id: &str) -> Result<()> {
    self.delete_record(RecordKind::Folder, id)
  }

  pub fn save_todo(&self, todo: &crate::records::Todo) -> Result<()> {
    self.put_record(todo)
  }

  pub fn get_todo(&self, id: &str) -> Result<Option<StoredRecord<crate::records::Todo>>> {
    self.get_record(id)
  }

  pub fn todos_for_user(&self, user_id: &str) -> Result<Vec<StoredRecord<crate::records::Todo>>> {
    self.records_for_user(user_id)
  }

  pub fn delete_todo(&self, id: &str) -> Result<()> {
    self.delete_record(RecordKind::Todo, id)
  }

  // ==========================================================================
  // Sync queue
  // ==========================================================================

  /// Record a mutation for later replay. Returns the queue id.
  pub fn enqueue_sync(
    &self,
    kind: RecordKind,
    method: &str,
    url: &str,
    data: &serde_json::Value,
    token: Option<&str>,
  ) -> Result<i64> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let payload =
      serde_json::to_string(data).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute(
        "INSERT INTO sync_queue (kind, method, url, data, token, timestamp, retry_count)
         VALUES (?, ?, ?, ?, ?, ?, 0)",
        params![kind.as_str(), method, url, payload, token, now_millis()],
      )
      .map_err(|e| eyre!("Failed to enqueue sync item: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  /// All pending sync items, oldest first.
  pub fn sync_queue(&self) -> Result<Vec<SyncQueueItem>> {
    self.query_sync_queue("1 = 1", params![])
  }

  /// Pending sync items for one record kind, oldest first.
  pub fn sync_queue_for(&self, kind: &str) -> Result<Vec<SyncQueueItem>> {
    self.query_sync_queue("kind = ?", params![kind])
  }

  fn query_sync_queue(
    &self,
    filter: &str,
    filter_params: impl rusqlite::Params,
  ) -> Result<Vec<SyncQueueItem>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(&format!(
        "SELECT id, kind, method, url, data, token, timestamp, retry_count
         FROM sync_queue WHERE {} ORDER BY timestamp ASC, id ASC",
        filter
      ))
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(i64, String, String, String, String, Option<String>, i64, u32)> = stmt
      .query_map(filter_params, |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
          row.get(7)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query sync queue: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut items = Vec::with_capacity(rows.len());
    for (id, kind, method, url, data, token, timestamp, retry_count) in rows {
      items.push(SyncQueueItem {
        id,
        kind,
        method,
        url,
        data: serde_json::from_str(&data)
          .map_err(|e| eyre!("Failed to deserialize queue payload: {}", e))?,
        token,
        timestamp,
        retry_count,
      });
    }

    Ok(items)
  }

  /// Remove a queue item after a confirmed successful replay (or at the
  /// retry cap).
  pub fn remove_sync_item(&self, id: i64) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM sync_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove sync item: {}", e))?;

    Ok(())
  }

  /// Increment a queue item's retry count after a failed replay.
  pub fn bump_retry(&self, id: i64) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "UPDATE sync_queue SET retry_count = retry_count + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to bump retry count: {}", e))?;

    Ok(())
  }

  pub fn clear_sync_queue(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM sync_queue", [])
      .map_err(|e| eyre!("Failed to clear sync queue: {}", e))?;

    Ok(())
  }

  // ==========================================================================
  // Settings
  // ==========================================================================

  pub fn save_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let payload =
      serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize setting: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO settings (key, value, timestamp) VALUES (?, ?, ?)",
        params![key, payload, now_millis()],
      )
      .map_err(|e| eyre!("Failed to save setting: {}", e))?;

    Ok(())
  }

  pub fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let value: Option<String> = conn
      .query_row("SELECT value FROM settings WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .ok();

    match value {
      Some(raw) => Ok(Some(
        serde_json::from_str(&raw).map_err(|e| eyre!("Failed to parse setting: {}", e))?,
      )),
      None => Ok(None),
    }
  }

  // ==========================================================================
  // Cache metadata with expiry
  // ==========================================================================

  /// Store a metadata blob with an absolute expiry of now + ttl.
  pub fn set_cache_metadata(
    &self,
    key: &str,
    metadata: &serde_json::Value,
    ttl: Duration,
  ) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let payload =
      serde_json::to_string(metadata).map_err(|e| eyre!("Failed to serialize metadata: {}", e))?;
    let expire_at = now_millis() + ttl.as_millis() as i64;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_metadata (key, metadata, expire_at) VALUES (?, ?, ?)",
        params![key, payload, expire_at],
      )
      .map_err(|e| eyre!("Failed to store cache metadata: {}", e))?;

    Ok(())
  }

  /// Get a metadata blob if still live. Expired entries are treated as
  /// absent and deleted on the spot (read-time eviction).
  pub fn get_cache_metadata(&self, key: &str) -> Result<Option<serde_json::Value>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(String, i64)> = conn
      .query_row(
        "SELECT metadata, expire_at FROM cache_metadata WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .ok();

    match row {
      Some((raw, expire_at)) if expire_at > now_millis() => Ok(Some(
        serde_json::from_str(&raw).map_err(|e| eyre!("Failed to parse metadata: {}", e))?,
      )),
      Some(_) => {
        conn
          .execute("DELETE FROM cache_metadata WHERE key = ?", params![key])
          .map_err(|e| eyre!("Failed to evict expired metadata: {}", e))?;
        Ok(None)
      }
      None => Ok(None),
    }
  }

  /// Purge every expired metadata entry, via the expire_at index. Returns
  /// the number of entries deleted. Coexists with read-time eviction, which
  /// only cleans up keys that are actually queried.
  pub fn cleanup_expired_cache(&self) -> Result<usize> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let deleted = conn
      .execute(
        "DELETE FROM cache_metadata WHERE expire_at <= ?",
        params![now_millis()],
      )
      .map_err(|e| eyre!("Failed to sweep expired metadata: {}", e))?;

    debug!(deleted, "swept expired cache metadata");
    Ok(deleted)
  }

  // ==========================================================================
  // Backup / introspection
  // ==========================================================================

  /// Export the user-visible tables for backup.
  pub fn export_data(&self) -> Result<Snapshot> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut data = BTreeMap::new();

    for table in ["notes", "folders", "todos"] {
      let mut stmt = conn
        .prepare(&format!("SELECT data FROM {} ORDER BY id", table))
        .map_err(|e| eyre!("Failed to prepare export query: {}", e))?;

      let rows: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| eyre!("Failed to export {}: {}", table, e))?
        .filter_map(|r| r.ok())
        .collect();

      let mut items = Vec::with_capacity(rows.len());
      for raw in rows {
        items.push(
          serde_json::from_str(&raw).map_err(|e| eyre!("Failed to parse exported row: {}", e))?,
        );
      }
      data.insert(table.to_string(), items);
    }

    // Settings export as {key, value} objects
    let mut stmt = conn
      .prepare("SELECT key, value FROM settings ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare settings export: {}", e))?;

    let rows: Vec<(String, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to export settings: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut settings = Vec::with_capacity(rows.len());
    for (key, value) in rows {
      let value: serde_json::Value =
        serde_json::from_str(&value).map_err(|e| eyre!("Failed to parse setting: {}", e))?;
      settings.push(serde_json::json!({ "key": key, "value": value }));
    }
    data.insert("settings".to_string(), settings);

    Ok(Snapshot {
      version: schema::DB_VERSION,
      timestamp: now_millis(),
      data,
    })
  }

  /// Restore records from a snapshot. Imported records go through the
  /// normal put path, so they come back pending.
  pub fn import_data(&self, snapshot: &Snapshot) -> Result<()> {
    for (table, items) in &snapshot.data {
      match table.as_str() {
        "notes" => {
          for item in items {
            let note: crate::records::Note = serde_json::from_value(item.clone())
              .map_err(|e| eyre!("Failed to parse imported note: {}", e))?;
            self.put_record(&note)?;
          }
        }
        "folders" => {
          for item in items {
            let folder: crate::records::Folder = serde_json::from_value(item.clone())
              .map_err(|e| eyre!("Failed to parse imported folder: {}", e))?;
            self.put_record(&folder)?;
          }
        }
        "todos" => {
          for item in items {
            let todo: crate::records::Todo = serde_json::from_value(item.clone())
              .map_err(|e| eyre!("Failed to parse imported todo: {}", e))?;
            self.put_record(&todo)?;
          }
        }
        "settings" => {
          for item in items {
            let key = item.get("key").and_then(|k| k.as_str());
            let value = item.get("value");
            if let (Some(key), Some(value)) = (key, value) {
              self.save_setting(key, value)?;
            }
          }
        }
        other => debug!(table = other, "skipping unknown table in import"),
      }
    }

    Ok(())
  }

  /// Per-table row counts.
  pub fn storage_usage(&self) -> Result<BTreeMap<String, usize>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut usage = BTreeMap::new();

    for table in ["notes", "folders", "todos", "sync_queue", "settings", "cache_metadata"] {
      usage.insert(table.to_string(), self.count_table(&conn, table)?);
    }

    Ok(usage)
  }
}

/// Current time as epoch milliseconds.
fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}
