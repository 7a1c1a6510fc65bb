pub const SCHEMA: &str = r#"
-- scheduled_entries table
CREATE TABLE IF NOT EXISTS scheduled_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    unit TEXT NOT NULL DEFAULT '',
    sample TEXT,
    pending INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_scheduled_entries_feed_id ON scheduled_entries(feed_id);
CREATE INDEX IF NOT EXISTS idx_scheduled_entries_pending ON scheduled_entries(pending);

-- favourite_entries table (feed_id is unique by convention only)
CREATE TABLE IF NOT EXISTS favourite_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    unit TEXT NOT NULL DEFAULT '',
    sample TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_favourite_entries_feed_id ON favourite_entries(feed_id);

-- trigger_leases table (one row per live trigger, shared by every process on this db)
CREATE TABLE IF NOT EXISTS trigger_leases (
    trigger_id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    generation INTEGER NOT NULL,
    heartbeat_at INTEGER NOT NULL
);
"#;

pub const SCHEDULED_COLUMNS: &[&str] = &["feed_id", "name", "unit", "sample", "pending"];
pub const FAVOURITE_COLUMNS: &[&str] = &["feed_id", "name", "unit", "sample"];
