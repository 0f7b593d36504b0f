//! Schema for the offline database.
//!
//! Setup is additive only: `IF NOT EXISTS` everywhere, so re-running it
//! across versions adds new tables and indexes without touching existing
//! data.

/// Logical schema version, recorded in data exports.
pub const DB_VERSION: u32 = 1;

/// The three record tables share a layout: the full record serialized as
/// JSON in `data`, plus the key columns the store indexes on. `secondary`
/// is the per-kind grouping key (folder for notes, parent for folders, due
/// date for todos).
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS notes (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    secondary TEXT,
    data TEXT NOT NULL,
    last_modified INTEGER NOT NULL,
    sync_status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notes_user ON notes(user_id);
CREATE INDEX IF NOT EXISTS idx_notes_secondary ON notes(secondary);
CREATE INDEX IF NOT EXISTS idx_notes_modified ON notes(last_modified);

CREATE TABLE IF NOT EXISTS folders (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    secondary TEXT,
    data TEXT NOT NULL,
    last_modified INTEGER NOT NULL,
    sync_status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_folders_user ON folders(user_id);
CREATE INDEX IF NOT EXISTS idx_folders_secondary ON folders(secondary);

CREATE TABLE IF NOT EXISTS todos (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    secondary TEXT,
    data TEXT NOT NULL,
    last_modified INTEGER NOT NULL,
    sync_status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_todos_user ON todos(user_id);
CREATE INDEX IF NOT EXISTS idx_todos_secondary ON todos(secondary);

-- Pending mutations awaiting replay
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    data TEXT NOT NULL,
    token TEXT,
    timestamp INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_kind ON sync_queue(kind);
CREATE INDEX IF NOT EXISTS idx_sync_queue_timestamp ON sync_queue(timestamp);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);

-- Auxiliary expiry records, independent of the response cache
CREATE TABLE IF NOT EXISTS cache_metadata (
    key TEXT PRIMARY KEY,
    metadata TEXT NOT NULL,
    expire_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_metadata_expire ON cache_metadata(expire_at);
"#;
