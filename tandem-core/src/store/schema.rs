/// Current schema version.
pub const SCHEMA_VERSION: &str = "1";

/// `SQLite` schema for coordination snapshots. Every table stores opaque JSON
/// records keyed by their natural id; the in-memory stores own all
/// invariants.
pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS tandem_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vertices (
    id INTEGER PRIMARY KEY,
    record TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    agent_id TEXT PRIMARY KEY,
    record TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS journal (
    seq INTEGER PRIMARY KEY,
    record TEXT NOT NULL
);

-- position orders closed trajectories oldest first; the open one has is_open = 1
CREATE TABLE IF NOT EXISTS trajectories (
    id TEXT PRIMARY KEY,
    position INTEGER NOT NULL,
    is_open INTEGER NOT NULL DEFAULT 0,
    record TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trajectories_position ON trajectories(position);

CREATE TABLE IF NOT EXISTS patterns (
    signature TEXT PRIMARY KEY,
    record TEXT NOT NULL
);
";

/// Meta keys for scalar counters.
pub const META_SCHEMA_VERSION: &str = "schema_version";
pub const META_NEXT_VERTEX_ID: &str = "next_vertex_id";
pub const META_JOURNAL_HEAD: &str = "journal_head";
pub const META_SAVED_AT: &str = "saved_at";

/// Tables cleared and rewritten on every save.
pub const DATA_TABLES: [&str; 5] = ["vertices", "agents", "journal", "trajectories", "patterns"];
