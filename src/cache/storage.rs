//! Cache storage trait and SQLite implementation.
//!
//! Storage is organised in named generations, each owning a set of
//! request-key → response snapshots.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::http::{Request, Response, ResponseKind};

/// A response snapshot read back from a generation.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: Response,
  /// When the snapshot was written
  pub cached_at: DateTime<Utc>,
}

/// Listing row for a cached request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
  pub method: String,
  pub url: String,
  pub status: u16,
  pub size: usize,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create `generation` (if needed) and write every entry in one atomic step.
  fn populate(&self, generation: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Write one entry, creating the generation if needed. Last write wins.
  fn put(&self, generation: &str, request: &Request, response: &Response) -> Result<()>;

  /// Look a request up in one generation.
  fn match_request(&self, generation: &str, request: &Request) -> Result<Option<CachedEntry>>;

  /// Names of every stored generation.
  fn generation_names(&self) -> Result<Vec<String>>;

  /// Delete a generation and its entries. Returns whether it existed.
  fn delete_generation(&self, generation: &str) -> Result<bool>;

  /// Record that `generation` has been activated.
  fn mark_active(&self, generation: &str) -> Result<()>;

  /// The most recently activated generation that still exists.
  fn active_generation(&self) -> Result<Option<String>>;

  /// Entries in a generation, ordered by URL.
  fn entries(&self, generation: &str) -> Result<Vec<EntrySummary>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Response fields other than the body, stored as JSON.
#[derive(Serialize, Deserialize)]
struct ResponseMeta {
  status: u16,
  headers: BTreeMap<String, String>,
  kind: ResponseKind,
  redirected: bool,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Cache storage that lives only as long as the process.
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
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    activated_seq INTEGER
);

CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    meta TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation ON cache_entries(generation);
"#;

fn ensure_generation(conn: &Connection, generation: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to create generation {}: {}", generation, e))?;
  Ok(())
}

fn write_entry(
  conn: &Connection,
  generation: &str,
  request: &Request,
  response: &Response,
) -> Result<()> {
  let meta = serde_json::to_string(&ResponseMeta {
    status: response.status,
    headers: response.headers.clone(),
    kind: response.kind,
    redirected: response.redirected,
  })
  .map_err(|e| eyre!("Failed to serialize response metadata: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (generation, request_key, method, url, meta, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        request.cache_key(),
        request.method.as_str(),
        request.url.as_str(),
        meta,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", request.url, generation, e))?;
  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn populate(&self, generation: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_generation(&tx, generation)?;
    for (request, response) in entries {
      write_entry(&tx, generation, request, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit generation {}: {}", generation, e))?;
    Ok(())
  }

  fn put(&self, generation: &str, request: &Request, response: &Response) -> Result<()> {
    let conn = self.conn()?;
    ensure_generation(&conn, generation)?;
    write_entry(&conn, generation, request, response)
  }

  fn match_request(&self, generation: &str, request: &Request) -> Result<Option<CachedEntry>> {
    let conn = self.conn()?;

    let row: Option<(String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT meta, body, cached_at FROM cache_entries
         WHERE generation = ? AND request_key = ?",
        params![generation, request.cache_key()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", request.url, generation, e))?;

    match row {
      Some((meta, body, cached_at_str)) => {
        let meta: ResponseMeta = serde_json::from_str(&meta)
          .map_err(|e| eyre!("Failed to deserialize response metadata: {}", e))?;
        Ok(Some(CachedEntry {
          response: Response {
            status: meta.status,
            headers: meta.headers,
            body,
            kind: meta.kind,
            redirected: meta.redirected,
          },
          cached_at: parse_datetime(&cached_at_str)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn generation_names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_generations ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read generation name: {}", e))?;

    Ok(names)
  }

  fn delete_generation(&self, generation: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", generation, e))?;
    let removed = tx
      .execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete generation {}: {}", generation, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit deletion of {}: {}", generation, e))?;
    Ok(removed > 0)
  }

  fn mark_active(&self, generation: &str) -> Result<()> {
    let conn = self.conn()?;
    ensure_generation(&conn, generation)?;
    conn
      .execute(
        "UPDATE cache_generations
         SET activated_seq = (SELECT COALESCE(MAX(activated_seq), 0) + 1 FROM cache_generations)
         WHERE name = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to mark {} active: {}", generation, e))?;
    Ok(())
  }

  fn active_generation(&self) -> Result<Option<String>> {
    let conn = self.conn()?;
    conn
      .query_row(
        "SELECT name FROM cache_generations
         WHERE activated_seq IS NOT NULL
         ORDER BY activated_seq DESC LIMIT 1",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read active generation: {}", e))
  }

  fn entries(&self, generation: &str) -> Result<Vec<EntrySummary>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT method, url, meta, length(body) FROM cache_entries
         WHERE generation = ? ORDER BY url, method",
      )
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let rows = stmt
      .query_map(params![generation], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, i64>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list entries of {}: {}", generation, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry row: {}", e))?;

    rows
      .into_iter()
      .map(|(method, url, meta, size)| {
        let meta: ResponseMeta = serde_json::from_str(&meta)
          .map_err(|e| eyre!("Failed to deserialize response metadata: {}", e))?;
        Ok(EntrySummary {
          method,
          url,
          status: meta.status,
          size: size.max(0) as usize,
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

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn get(path: &str) -> Request {
    Request::get(Url::parse("http://localhost:8080/").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_populate_then_match() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let entries = vec![
      (get("/index.html"), Response::new(200, "<html>")),
      (get("/styles.css"), Response::new(200, "body{}")),
    ];
    storage.populate("study-v1", &entries).unwrap();

    let hit = storage
      .match_request("study-v1", &get("/styles.css"))
      .unwrap()
      .unwrap();
    assert_eq!(hit.response.body, b"body{}");
    assert_eq!(hit.response.status, 200);
    let age = Utc::now() - hit.cached_at;
    assert!(age >= chrono::Duration::zero() && age < chrono::Duration::minutes(1));

    assert!(storage
      .match_request("study-v1", &get("/missing.js"))
      .unwrap()
      .is_none());
    assert!(storage
      .match_request("study-v2", &get("/styles.css"))
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_put_is_last_write_wins() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .put("study-v1", &get("/a.js"), &Response::new(200, "one"))
      .unwrap();
    storage
      .put("study-v1", &get("/a.js"), &Response::new(200, "two"))
      .unwrap();

    let entries = storage.entries("study-v1").unwrap();
    assert_eq!(entries.len(), 1);
    let hit = storage.match_request("study-v1", &get("/a.js")).unwrap().unwrap();
    assert_eq!(hit.response.body, b"two");
  }

  #[test]
  fn test_delete_generation_removes_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .put("study-v1", &get("/a.js"), &Response::new(200, "a"))
      .unwrap();
    storage
      .put("study-v2", &get("/a.js"), &Response::new(200, "b"))
      .unwrap();

    assert!(storage.delete_generation("study-v1").unwrap());
    assert!(!storage.delete_generation("study-v1").unwrap());
    assert_eq!(storage.generation_names().unwrap(), vec!["study-v2"]);
    assert!(storage.entries("study-v1").unwrap().is_empty());
  }

  #[test]
  fn test_active_generation_follows_latest_activation() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert_eq!(storage.active_generation().unwrap(), None);

    storage.mark_active("study-v1").unwrap();
    storage.mark_active("study-v2").unwrap();
    assert_eq!(
      storage.active_generation().unwrap().as_deref(),
      Some("study-v2")
    );

    storage.delete_generation("study-v2").unwrap();
    assert_eq!(
      storage.active_generation().unwrap().as_deref(),
      Some("study-v1")
    );
  }

  #[test]
  fn test_snapshot_keeps_headers_and_kind() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let response = Response::new(200, vec![0u8, 159, 146, 150])
      .with_header("Content-Type", "application/pdf")
      .with_kind(ResponseKind::Basic);
    storage.put("study-v1", &get("/doc.pdf"), &response).unwrap();

    let hit = storage.match_request("study-v1", &get("/doc.pdf")).unwrap().unwrap();
    assert_eq!(hit.response, response);
  }
}
