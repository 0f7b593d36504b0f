//! Domain records mirrored into local storage, plus sync bookkeeping types.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// The three record tables in the offline database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
  Note,
  Folder,
  Todo,
}

impl RecordKind {
  /// Table name in the offline database.
  pub fn table(self) -> &'static str {
    match self {
      RecordKind::Note => "notes",
      RecordKind::Folder => "folders",
      RecordKind::Todo => "todos",
    }
  }

  /// Wire name used in sync queue items ("note", "todo", ...).
  pub fn as_str(self) -> &'static str {
    match self {
      RecordKind::Note => "note",
      RecordKind::Folder => "folder",
      RecordKind::Todo => "todo",
    }
  }
}

/// Sync state of a locally stored record.
///
/// Every local write re-pends the record; only an explicit mark-as-synced
/// call after a confirmed server round-trip flips it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
  Pending,
  Synced,
}

impl SyncStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      SyncStatus::Pending => "pending",
      SyncStatus::Synced => "synced",
    }
  }

  pub fn parse(s: &str) -> Self {
    match s {
      "synced" => SyncStatus::Synced,
      _ => SyncStatus::Pending,
    }
  }
}

/// Trait for entities persisted in the offline record store.
///
/// Implementors provide the key columns the store indexes on; everything
/// else rides along in the serialized record body.
pub trait LocalRecord: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Primary key
  fn record_id(&self) -> &str;

  /// Owning user, always indexed
  fn user_id(&self) -> &str;

  /// Per-kind secondary index value (folder for notes, parent for folders,
  /// due date for todos). None when the record has no such grouping.
  fn secondary_key(&self) -> Option<String>;

  fn kind() -> RecordKind;
}

/// A record as read back from the offline store, with its bookkeeping.
#[derive(Debug, Clone)]
pub struct StoredRecord<T> {
  pub record: T,
  /// Epoch milliseconds of the last local write
  pub last_modified: i64,
  pub sync_status: SyncStatus,
}

/// A note in a folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
  pub id: String,
  pub user_id: String,
  pub folder_id: Option<String>,
  pub title: String,
  pub content: String,
  /// Server-side modification timestamp, when known
  pub updated_at: Option<String>,
}

impl LocalRecord for Note {
  fn record_id(&self) -> &str {
    &self.id
  }

  fn user_id(&self) -> &str {
    &self.user_id
  }

  fn secondary_key(&self) -> Option<String> {
    self.folder_id.clone()
  }

  fn kind() -> RecordKind {
    RecordKind::Note
  }
}

/// A folder in the user's folder tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
  pub id: String,
  pub user_id: String,
  pub parent_id: Option<String>,
  pub name: String,
}

impl LocalRecord for Folder {
  fn record_id(&self) -> &str {
    &self.id
  }

  fn user_id(&self) -> &str {
    &self.user_id
  }

  fn secondary_key(&self) -> Option<String> {
    self.parent_id.clone()
  }

  fn kind() -> RecordKind {
    RecordKind::Folder
  }
}

/// A todo item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
  pub id: String,
  pub user_id: String,
  pub title: String,
  pub completed: bool,
  pub due_date: Option<String>,
}

impl LocalRecord for Todo {
  fn record_id(&self) -> &str {
    &self.id
  }

  fn user_id(&self) -> &str {
    &self.user_id
  }

  fn secondary_key(&self) -> Option<String> {
    self.due_date.clone()
  }

  fn kind() -> RecordKind {
    RecordKind::Todo
  }
}

/// A recorded mutation awaiting replay against the server.
///
/// `retry_count` is the only field mutated in place; everything else is
/// fixed at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
  /// Auto-assigned queue id
  pub id: i64,
  /// Record kind wire name ("note", "todo")
  pub kind: String,
  pub method: String,
  pub url: String,
  pub data: serde_json::Value,
  /// Bearer token captured when the mutation was queued
  pub token: Option<String>,
  /// Epoch milliseconds when the mutation was queued
  pub timestamp: i64,
  pub retry_count: u32,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sync_status_wire_format() {
    assert_eq!(SyncStatus::Pending.as_str(), "pending");
    assert_eq!(SyncStatus::parse("synced"), SyncStatus::Synced);
    // Unknown values degrade to pending, the safe default
    assert_eq!(SyncStatus::parse("garbage"), SyncStatus::Pending);
  }

  #[test]
  fn test_secondary_keys() {
    let note = Note {
      id: "n1".into(),
      user_id: "u1".into(),
      folder_id: Some("f1".into()),
      title: "t".into(),
      content: "c".into(),
      updated_at: None,
    };
    assert_eq!(note.secondary_key().as_deref(), Some("f1"));

    let folder = Folder {
      id: "f1".into(),
      user_id: "u1".into(),
      parent_id: None,
      name: "root".into(),
    };
    assert_eq!(folder.secondary_key(), None);
  }
}
