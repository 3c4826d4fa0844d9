//! Generic per-collection CRUD over the store tables.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

use super::database::Database;
use super::types::ResourceId;

/// The five independent collections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionName {
  Resources,
  Favorites,
  Notes,
  Downloads,
  Settings,
}

impl CollectionName {
  pub const ALL: [CollectionName; 5] = [
    CollectionName::Resources,
    CollectionName::Favorites,
    CollectionName::Notes,
    CollectionName::Downloads,
    CollectionName::Settings,
  ];

  pub fn table(&self) -> &'static str {
    match self {
      CollectionName::Resources => "resources",
      CollectionName::Favorites => "favorites",
      CollectionName::Notes => "notes",
      CollectionName::Downloads => "downloads",
      CollectionName::Settings => "settings",
    }
  }
}

impl fmt::Display for CollectionName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.table())
  }
}

/// Trait for rows that live in one store collection.
pub trait Entity: Clone + Serialize + DeserializeOwned {
  const COLLECTION: CollectionName;

  /// Primary key within the collection
  fn key(&self) -> String;

  /// Owning resource, indexed for lookups by resource
  fn resource_id(&self) -> Option<ResourceId> {
    None
  }
}

fn encode<T: Entity>(entity: &T) -> Result<Vec<u8>> {
  serde_json::to_vec(entity)
    .map_err(|e| eyre!("Failed to serialize {} {}: {}", T::COLLECTION, entity.key(), e))
}

fn decode<T: Entity>(data: &[u8]) -> Result<T> {
  serde_json::from_slice(data)
    .map_err(|e| eyre!("Failed to deserialize {} row: {}", T::COLLECTION, e))
}

fn query_rows<T: Entity>(
  conn: &Connection,
  sql: &str,
  params: impl rusqlite::Params,
) -> Result<Vec<T>> {
  let mut stmt = conn
    .prepare(sql)
    .map_err(|e| eyre!("Failed to prepare {} query: {}", T::COLLECTION, e))?;

  let rows = stmt
    .query_map(params, |row| row.get::<_, Vec<u8>>(0))
    .map_err(|e| eyre!("Failed to query {}: {}", T::COLLECTION, e))?
    .collect::<rusqlite::Result<Vec<_>>>()
    .map_err(|e| eyre!("Failed to read {} row: {}", T::COLLECTION, e))?;

  rows.iter().map(|data| decode(data)).collect()
}

fn insert<T: Entity>(conn: &Connection, entity: &T) -> Result<()> {
  let data = encode(entity)?;
  let key = entity.key();
  conn
    .execute(
      &format!(
        "INSERT INTO {} (key, resource_id, data) VALUES (?, ?, ?)",
        T::COLLECTION.table()
      ),
      params![key, entity.resource_id(), data],
    )
    .map_err(|e| eyre!("Failed to add {} {}: {}", T::COLLECTION, key, e))?;
  Ok(())
}

fn key_exists(conn: &Connection, collection: CollectionName, key: &str) -> Result<bool> {
  conn
    .query_row(
      &format!("SELECT 1 FROM {} WHERE key = ?", collection.table()),
      params![key],
      |_| Ok(()),
    )
    .optional()
    .map(|row| row.is_some())
    .map_err(|e| eyre!("Failed to look up {} {}: {}", collection, key, e))
}

impl Database {
  /// Insert a new row. Fails if the key already exists.
  pub fn add<T: Entity>(&self, entity: &T) -> Result<()> {
    self.with_conn(|conn| insert(conn, entity))
  }

  /// Insert a row built for the first unused numeric key at or above `start`.
  ///
  /// The key search and the insert run under one connection lock, so
  /// concurrent callers never pick the same key.
  pub fn add_with_next_id<T: Entity>(&self, start: u64, build: impl Fn(u64) -> T) -> Result<T> {
    self.with_conn(|conn| {
      let mut id = start;
      while key_exists(conn, T::COLLECTION, &id.to_string())? {
        id += 1;
      }
      let entity = build(id);
      insert(conn, &entity)?;
      Ok(entity)
    })
  }

  /// Insert unless the key exists. Returns whether a row was written.
  pub fn add_if_absent<T: Entity>(&self, entity: &T) -> Result<bool> {
    let data = encode(entity)?;
    let key = entity.key();
    self.with_conn(|conn| {
      let inserted = conn
        .execute(
          &format!(
            "INSERT INTO {} (key, resource_id, data) VALUES (?, ?, ?)
             ON CONFLICT(key) DO NOTHING",
            T::COLLECTION.table()
          ),
          params![key, entity.resource_id(), data],
        )
        .map_err(|e| eyre!("Failed to add {} {}: {}", T::COLLECTION, key, e))?;
      Ok(inserted > 0)
    })
  }

  pub fn get<T: Entity>(&self, key: &str) -> Result<Option<T>> {
    self.with_conn(|conn| {
      let data: Option<Vec<u8>> = conn
        .query_row(
          &format!("SELECT data FROM {} WHERE key = ?", T::COLLECTION.table()),
          params![key],
          |row| row.get(0),
        )
        .optional()
        .map_err(|e| eyre!("Failed to get {} {}: {}", T::COLLECTION, key, e))?;

      data.map(|d| decode(&d)).transpose()
    })
  }

  /// Every row in the collection.
  pub fn get_all<T: Entity>(&self) -> Result<Vec<T>> {
    self.with_conn(|conn| {
      query_rows(
        conn,
        &format!("SELECT data FROM {} ORDER BY rowid", T::COLLECTION.table()),
        [],
      )
    })
  }

  /// Rows owned by one resource, in insertion order.
  pub fn get_by_resource<T: Entity>(&self, resource_id: ResourceId) -> Result<Vec<T>> {
    self.with_conn(|conn| {
      query_rows(
        conn,
        &format!(
          "SELECT data FROM {} WHERE resource_id = ? ORDER BY rowid",
          T::COLLECTION.table()
        ),
        params![resource_id],
      )
    })
  }

  /// Insert or replace by key. An existing row keeps its insertion position.
  pub fn put<T: Entity>(&self, entity: &T) -> Result<()> {
    let data = encode(entity)?;
    let key = entity.key();
    self.with_conn(|conn| {
      conn
        .execute(
          &format!(
            "INSERT INTO {} (key, resource_id, data) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE
             SET resource_id = excluded.resource_id, data = excluded.data",
            T::COLLECTION.table()
          ),
          params![key, entity.resource_id(), data],
        )
        .map_err(|e| eyre!("Failed to update {} {}: {}", T::COLLECTION, key, e))?;
      Ok(())
    })
  }

  /// Delete one row. Returns whether it existed.
  pub fn delete<T: Entity>(&self, key: &str) -> Result<bool> {
    self.with_conn(|conn| {
      let removed = conn
        .execute(
          &format!("DELETE FROM {} WHERE key = ?", T::COLLECTION.table()),
          params![key],
        )
        .map_err(|e| eyre!("Failed to delete {} {}: {}", T::COLLECTION, key, e))?;
      Ok(removed > 0)
    })
  }

  pub fn count(&self, collection: CollectionName) -> Result<usize> {
    self.with_conn(|conn| {
      let count: i64 = conn
        .query_row(
          &format!("SELECT COUNT(*) FROM {}", collection.table()),
          [],
          |row| row.get(0),
        )
        .map_err(|e| eyre!("Failed to count {}: {}", collection, e))?;
      Ok(count.max(0) as usize)
    })
  }

  /// Empty one collection.
  pub fn clear(&self, collection: CollectionName) -> Result<()> {
    self.with_conn(|conn| {
      conn
        .execute(&format!("DELETE FROM {}", collection.table()), [])
        .map_err(|e| eyre!("Failed to clear {}: {}", collection, e))?;
      Ok(())
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::types::{Note, Setting};
  use chrono::Utc;
  use serde_json::json;

  fn note(id: u64, resource_id: u64, content: &str) -> Note {
    Note {
      id,
      resource_id,
      content: content.to_string(),
      created_at: Utc::now(),
      updated_at: None,
    }
  }

  #[test]
  fn test_add_rejects_duplicate_key() {
    let db = Database::open_in_memory().unwrap();
    db.add(&note(1, 5, "first")).unwrap();
    let err = db.add(&note(1, 5, "again")).unwrap_err();
    assert!(err.to_string().contains("notes 1"));
  }

  #[test]
  fn test_add_with_next_id_skips_taken_keys() {
    let db = Database::open_in_memory().unwrap();
    db.add(&note(10, 5, "taken")).unwrap();
    db.add(&note(11, 5, "taken too")).unwrap();

    let added = db.add_with_next_id(10, |id| note(id, 5, "fresh")).unwrap();
    assert_eq!(added.id, 12);
    assert_eq!(db.get::<Note>("12").unwrap().unwrap().content, "fresh");
  }

  #[test]
  fn test_add_if_absent_keeps_existing_row() {
    let db = Database::open_in_memory().unwrap();
    assert!(db.add_if_absent(&note(1, 5, "first")).unwrap());
    assert!(!db.add_if_absent(&note(1, 5, "second")).unwrap());
    assert_eq!(db.get::<Note>("1").unwrap().unwrap().content, "first");
  }

  #[test]
  fn test_get_returns_none_for_missing() {
    let db = Database::open_in_memory().unwrap();
    assert_eq!(db.get::<Note>("404").unwrap(), None);
  }

  #[test]
  fn test_put_upserts_and_keeps_order() {
    let db = Database::open_in_memory().unwrap();
    db.add(&note(1, 5, "a")).unwrap();
    db.add(&note(2, 5, "b")).unwrap();
    db.add(&note(3, 6, "other resource")).unwrap();

    db.put(&note(1, 5, "a edited")).unwrap();
    db.put(&note(4, 5, "c")).unwrap();

    let contents: Vec<String> = db
      .get_by_resource::<Note>(5)
      .unwrap()
      .into_iter()
      .map(|n| n.content)
      .collect();
    assert_eq!(contents, vec!["a edited", "b", "c"]);
    assert_eq!(db.count(CollectionName::Notes).unwrap(), 4);
  }

  #[test]
  fn test_delete_and_clear() {
    let db = Database::open_in_memory().unwrap();
    db.add(&Setting {
      key: "theme".to_string(),
      value: json!("dark"),
    })
    .unwrap();
    db.add(&note(1, 5, "a")).unwrap();

    assert!(db.delete::<Setting>("theme").unwrap());
    assert!(!db.delete::<Setting>("theme").unwrap());

    db.clear(CollectionName::Notes).unwrap();
    assert!(db.get_all::<Note>().unwrap().is_empty());
  }
}
