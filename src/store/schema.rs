/// Ordered schema migrations. `PRAGMA user_version` records how many have
/// been applied; new versions are appended, never edited.
pub const MIGRATIONS: &[&str] = &[
  // v1: cache records, expiry metadata and the offline queue
  r#"
-- Known entity collections
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY
);

-- Cached entity payloads (serialized JSON)
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL REFERENCES collections(name),
    id TEXT NOT NULL,
    parent_id TEXT,
    data BLOB NOT NULL,
    cached_at INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_records_parent
    ON records(collection, parent_id);

-- One row per cached record, keyed "<collection>:<id>"
CREATE TABLE IF NOT EXISTS cache_metadata (
    key TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    record_id TEXT NOT NULL,
    cached_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_metadata_expires
    ON cache_metadata(expires_at);

-- Mutations waiting for replay
CREATE TABLE IF NOT EXISTS offline_queue (
    id TEXT PRIMARY KEY,
    action_type TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    method TEXT NOT NULL,
    data BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_offline_queue_timestamp
    ON offline_queue(timestamp);

CREATE INDEX IF NOT EXISTS idx_offline_queue_entity_type
    ON offline_queue(entity_type);
"#,
  // v2: persisted retry eligibility
  r#"
ALTER TABLE offline_queue ADD COLUMN next_attempt_at INTEGER;
"#,
];

/// Latest schema version.
pub fn current_version() -> u32 {
  MIGRATIONS.len() as u32
}
