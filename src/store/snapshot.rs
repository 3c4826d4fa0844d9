//! Export and import of the whole store as one JSON document.

use color_eyre::{eyre::WrapErr, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info};

use super::local::LocalStore;
use super::types::{Download, Favorite, Note, Resource, ResourceId, Setting};

/// Everything in the store. Notes are grouped by owning resource and keep
/// their per-resource order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
  #[serde(default)]
  pub resources: Vec<Resource>,
  #[serde(default)]
  pub favorites: Vec<ResourceId>,
  #[serde(default)]
  pub notes: BTreeMap<ResourceId, Vec<Note>>,
  #[serde(default)]
  pub downloads: Vec<Download>,
  #[serde(default)]
  pub settings: Vec<Setting>,
}

impl Snapshot {
  pub fn from_json(data: &str) -> Result<Self> {
    serde_json::from_str(data).wrap_err("Failed to parse snapshot")
  }

  pub fn to_json(&self) -> Result<String> {
    serde_json::to_string_pretty(self).wrap_err("Failed to serialize snapshot")
  }
}

impl LocalStore {
  pub fn export_data(&self) -> Result<Snapshot> {
    let mut notes: BTreeMap<ResourceId, Vec<Note>> = BTreeMap::new();
    for note in self.get_all_notes()? {
      notes.entry(note.resource_id).or_default().push(note);
    }

    Ok(Snapshot {
      resources: self.get_resources()?,
      favorites: self.get_favorites()?,
      notes,
      downloads: self.get_downloads()?,
      settings: self.get_settings()?,
    })
  }

  /// Clear the store, then insert every snapshot row in turn.
  ///
  /// Not atomic: the first failing insert stops the import and the store is
  /// left with whatever was inserted before it.
  pub fn import_data(&self, snapshot: &Snapshot) -> Result<()> {
    self.clear_all_data().wrap_err("Import failed while clearing the store")?;

    let result = self.insert_snapshot(snapshot);
    match &result {
      Ok(()) => info!(
        resources = snapshot.resources.len(),
        favorites = snapshot.favorites.len(),
        notes = snapshot.notes.values().map(Vec::len).sum::<usize>(),
        downloads = snapshot.downloads.len(),
        settings = snapshot.settings.len(),
        "Imported snapshot"
      ),
      Err(e) => error!(error = %e, "Import stopped part way; store holds a partial snapshot"),
    }
    result
  }

  fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
    let db = self.database();

    for resource in &snapshot.resources {
      db.add(resource)?;
    }
    for &resource_id in &snapshot.favorites {
      db.add(&Favorite {
        resource_id,
        added_at: chrono::Utc::now(),
      })?;
    }
    for notes in snapshot.notes.values() {
      for note in notes {
        db.add(note)?;
      }
    }
    for download in &snapshot.downloads {
      db.add(download)?;
    }
    for setting in &snapshot.settings {
      db.add(setting)?;
    }
    Ok(())
  }
}
