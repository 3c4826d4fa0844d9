//! Store facade used by the app: favorites, notes, downloads, settings and
//! the resource mirror.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

use super::collection::CollectionName;
use super::database::Database;
use super::types::{Download, Favorite, Note, Resource, ResourceId, Setting};

/// The local persistence store.
pub struct LocalStore {
  db: Database,
}

impl LocalStore {
  pub fn open(path: &Path) -> Result<Self> {
    Ok(Self {
      db: Database::open(path)?,
    })
  }

  pub fn open_in_memory() -> Result<Self> {
    Ok(Self {
      db: Database::open_in_memory()?,
    })
  }

  pub fn database(&self) -> &Database {
    &self.db
  }

  // --- Resources ---

  /// Replace the resource mirror with `resources`.
  pub fn save_resources(&self, resources: &[Resource]) -> Result<()> {
    self.db.clear(CollectionName::Resources)?;
    for resource in resources {
      self.db.put(resource)?;
    }
    info!(count = resources.len(), "Saved resource mirror");
    Ok(())
  }

  pub fn get_resources(&self) -> Result<Vec<Resource>> {
    self.db.get_all()
  }

  pub fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>> {
    self.db.get(&id.to_string())
  }

  // --- Favorites ---

  /// Mark a resource as favorite. Adding twice keeps the first timestamp.
  pub fn add_favorite(&self, resource_id: ResourceId) -> Result<()> {
    let added = self.db.add_if_absent(&Favorite {
      resource_id,
      added_at: Utc::now(),
    })?;
    if !added {
      debug!(resource_id, "Already a favorite");
    }
    Ok(())
  }

  pub fn remove_favorite(&self, resource_id: ResourceId) -> Result<bool> {
    self.db.delete::<Favorite>(&resource_id.to_string())
  }

  /// Favorite resource ids, oldest first.
  pub fn get_favorites(&self) -> Result<Vec<ResourceId>> {
    Ok(
      self
        .db
        .get_all::<Favorite>()?
        .into_iter()
        .map(|f| f.resource_id)
        .collect(),
    )
  }

  pub fn is_favorite(&self, resource_id: ResourceId) -> Result<bool> {
    Ok(self.db.get::<Favorite>(&resource_id.to_string())?.is_some())
  }

  // --- Notes ---

  /// Attach a note to a resource. The id is a millisecond timestamp, bumped
  /// until unused.
  pub fn add_note(&self, resource_id: ResourceId, content: &str) -> Result<Note> {
    let now = Utc::now();
    self.db.add_with_next_id(now.timestamp_millis().max(0) as u64, |id| Note {
      id,
      resource_id,
      content: content.to_string(),
      created_at: now,
      updated_at: None,
    })
  }

  pub fn update_note(&self, id: u64, content: &str) -> Result<Note> {
    let mut note = self
      .db
      .get::<Note>(&id.to_string())?
      .ok_or_else(|| eyre!("Note {} not found", id))?;
    note.content = content.to_string();
    note.updated_at = Some(Utc::now());
    self.db.put(&note)?;
    Ok(note)
  }

  pub fn delete_note(&self, id: u64) -> Result<bool> {
    self.db.delete::<Note>(&id.to_string())
  }

  /// Notes for one resource in the order they were written.
  pub fn get_notes_by_resource(&self, resource_id: ResourceId) -> Result<Vec<Note>> {
    self.db.get_by_resource(resource_id)
  }

  pub fn get_all_notes(&self) -> Result<Vec<Note>> {
    self.db.get_all()
  }

  // --- Downloads ---

  /// Start tracking a download at 0%.
  pub fn add_download(&self, resource_id: ResourceId, title: &str) -> Result<Download> {
    let now = Utc::now();
    self.db.add_with_next_id(now.timestamp_millis().max(0) as u64, |id| Download {
      id,
      resource_id,
      title: title.to_string(),
      progress: 0,
      started_at: now,
      completed_at: None,
    })
  }

  /// Advance a download's progress. Progress never moves backwards.
  pub fn update_download(&self, id: u64, progress: u8) -> Result<Download> {
    let mut download = self
      .db
      .get::<Download>(&id.to_string())?
      .ok_or_else(|| eyre!("Download {} not found", id))?;

    if !download.advance_to(progress) {
      if progress < download.progress {
        warn!(
          id,
          current = download.progress,
          requested = progress,
          "Ignoring backwards download progress"
        );
      }
      return Ok(download);
    }
    self.db.put(&download)?;
    Ok(download)
  }

  pub fn get_downloads(&self) -> Result<Vec<Download>> {
    self.db.get_all()
  }

  pub fn delete_download(&self, id: u64) -> Result<bool> {
    self.db.delete::<Download>(&id.to_string())
  }

  // --- Settings ---

  pub fn get_setting(&self, key: &str) -> Result<Option<Value>> {
    Ok(self.db.get::<Setting>(key)?.map(|s| s.value))
  }

  pub fn set_setting(&self, key: &str, value: Value) -> Result<()> {
    self.db.put(&Setting {
      key: key.to_string(),
      value,
    })
  }

  pub fn get_settings(&self) -> Result<Vec<Setting>> {
    self.db.get_all()
  }

  // --- Whole store ---

  /// Empty every collection, one after another.
  ///
  /// Not atomic across collections: a failure part way leaves earlier
  /// collections empty and later ones untouched.
  pub fn clear_all_data(&self) -> Result<()> {
    for collection in CollectionName::ALL {
      self.db.clear(collection)?;
    }
    info!("Cleared all local data");
    Ok(())
  }
}
