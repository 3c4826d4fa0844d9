//! Store schema, one table per collection.
//!
//! Every statement is `IF NOT EXISTS`, so running a migration twice is a
//! no-op and upgrades never touch tables that already exist.

/// Version recorded in `PRAGMA user_version` once all migrations have run.
pub const SCHEMA_VERSION: i64 = 2;

/// Migrations in order; entry `i` brings the schema to version `i + 1`.
pub const MIGRATIONS: &[&str] = &[
  // v1: resource mirror and per-user collections
  r#"
CREATE TABLE IF NOT EXISTS resources (
    key TEXT PRIMARY KEY,
    resource_id INTEGER,
    data BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS favorites (
    key TEXT PRIMARY KEY,
    resource_id INTEGER,
    data BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS notes (
    key TEXT PRIMARY KEY,
    resource_id INTEGER,
    data BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notes_resource ON notes(resource_id);

CREATE TABLE IF NOT EXISTS downloads (
    key TEXT PRIMARY KEY,
    resource_id INTEGER,
    data BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_downloads_resource ON downloads(resource_id);
"#,
  // v2: user settings
  r#"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    resource_id INTEGER,
    data BLOB NOT NULL
);
"#,
];
