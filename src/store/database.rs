use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use super::schema::{MIGRATIONS, SCHEMA_VERSION};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbState {
  Closed,
  Opening,
  /// Running schema migrations
  Upgrading,
  Open,
}

/// Versioned local database holding the store collections
pub struct Database {
  conn: Mutex<Option<Connection>>,
  state: Mutex<DbState>,
}

impl Database {
  /// Open or create the database at `path`, upgrading the schema if needed.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let db = Self::closed();
    db.set_state(DbState::Opening);
    let conn = match Connection::open(path) {
      Ok(conn) => conn,
      Err(e) => {
        db.set_state(DbState::Closed);
        return Err(eyre!("Failed to open database at {}: {}", path.display(), e));
      }
    };

    db.initialize(conn)?;
    Ok(db)
  }

  /// Database that lives only as long as the process.
  pub fn open_in_memory() -> Result<Self> {
    let db = Self::closed();
    db.set_state(DbState::Opening);
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    db.initialize(conn)?;
    Ok(db)
  }

  fn closed() -> Self {
    Self {
      conn: Mutex::new(None),
      state: Mutex::new(DbState::Closed),
    }
  }

  fn initialize(&self, conn: Connection) -> Result<()> {
    if let Err(e) = self.run_migrations(&conn) {
      self.set_state(DbState::Closed);
      return Err(e);
    }

    *self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))? = Some(conn);
    self.set_state(DbState::Open);
    Ok(())
  }

  /// Run database migrations newer than the stored schema version
  fn run_migrations(&self, conn: &Connection) -> Result<()> {
    let current = read_version(conn)?;
    if current >= SCHEMA_VERSION {
      debug!(version = current, "Schema up to date");
      return Ok(());
    }

    self.set_state(DbState::Upgrading);
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin upgrade: {}", e))?;

    for (index, migration) in MIGRATIONS.iter().enumerate().skip(current.max(0) as usize) {
      tx.execute_batch(migration)
        .map_err(|e| eyre!("Failed to run migration {}: {}", index + 1, e))?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
      .map_err(|e| eyre!("Failed to record schema version: {}", e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit upgrade: {}", e))?;

    info!(from = current, to = SCHEMA_VERSION, "Upgraded store schema");
    Ok(())
  }

  pub fn state(&self) -> DbState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_state(&self, state: DbState) {
    debug!(?state, "Database state");
    *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
  }

  /// Close the connection. Later operations fail until reopened.
  pub fn close(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .take();
    self.set_state(DbState::Closed);

    if let Some(conn) = conn {
      conn
        .close()
        .map_err(|(_, e)| eyre!("Failed to close database: {}", e))?;
    }
    Ok(())
  }

  pub fn schema_version(&self) -> Result<i64> {
    self.with_conn(read_version)
  }

  /// Run `f` against the open connection.
  pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    let guard = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    match guard.as_ref() {
      Some(conn) => f(conn),
      None => Err(eyre!("database is closed")),
    }
  }
}

fn read_version(conn: &Connection) -> Result<i64> {
  conn
    .pragma_query_value(None, "user_version", |row| row.get(0))
    .map_err(|e| eyre!("Failed to read schema version: {}", e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table_names(db: &Database) -> Vec<String> {
    db.with_conn(|conn| {
      let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .unwrap();
      let names = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<String>>>()
        .unwrap();
      Ok(names)
    })
    .unwrap()
  }

  #[test]
  fn test_open_creates_every_collection() {
    let db = Database::open_in_memory().unwrap();
    assert_eq!(db.state(), DbState::Open);
    assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    assert_eq!(
      table_names(&db),
      vec!["downloads", "favorites", "notes", "resources", "settings"]
    );
  }

  #[test]
  fn test_upgrade_from_v1_keeps_existing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    {
      let conn = Connection::open(&path).unwrap();
      conn.execute_batch(MIGRATIONS[0]).unwrap();
      conn
        .execute(
          "INSERT INTO favorites (key, resource_id, data) VALUES ('5', 5, '{}')",
          [],
        )
        .unwrap();
      conn.pragma_update(None, "user_version", 1).unwrap();
    }

    let db = Database::open(&path).unwrap();
    assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    assert!(table_names(&db).contains(&"settings".to_string()));
    let count: i64 = db
      .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM favorites", [], |r| r.get(0))?))
      .unwrap();
    assert_eq!(count, 1);
  }

  #[test]
  fn test_reopen_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.db");

    Database::open(&path).unwrap().close().unwrap();
    let db = Database::open(&path).unwrap();
    assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    assert_eq!(table_names(&db).len(), 5);
  }

  #[test]
  fn test_closed_database_rejects_operations() {
    let db = Database::open_in_memory().unwrap();
    db.close().unwrap();
    assert_eq!(db.state(), DbState::Closed);
    let err = db.schema_version().unwrap_err();
    assert!(err.to_string().contains("database is closed"));
  }

  #[test]
  fn test_open_fails_on_unusable_path() {
    let dir = tempfile::tempdir().unwrap();
    // A directory cannot be opened as a database file
    assert!(Database::open(dir.path()).is_err());
  }
}
