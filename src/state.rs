//! Application state, loaded from the store and passed through mutations.
//!
//! Each mutation writes to the store first and then returns the updated
//! state, so the state never shows a change the store rejected.

use color_eyre::Result;
use std::collections::{BTreeMap, BTreeSet};

use crate::store::{Download, LocalStore, Note, Resource, ResourceId};

#[derive(Debug, Clone, Default)]
pub struct LibraryState {
  pub resources: Vec<Resource>,
  pub favorites: BTreeSet<ResourceId>,
  /// Notes per resource, in insertion order
  pub notes: BTreeMap<ResourceId, Vec<Note>>,
  pub downloads: Vec<Download>,
}

impl LibraryState {
  pub fn load(store: &LocalStore) -> Result<Self> {
    let mut notes: BTreeMap<ResourceId, Vec<Note>> = BTreeMap::new();
    for note in store.get_all_notes()? {
      notes.entry(note.resource_id).or_default().push(note);
    }

    Ok(Self {
      resources: store.get_resources()?,
      favorites: store.get_favorites()?.into_iter().collect(),
      notes,
      downloads: store.get_downloads()?,
    })
  }

  pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
    self.resources.iter().find(|r| r.id == id)
  }

  fn is_known(&self, id: ResourceId) -> bool {
    self.resource(id).is_some()
  }

  /// Favorite or unfavorite a resource.
  pub fn toggle_favorite(mut self, store: &LocalStore, id: ResourceId) -> Result<Self> {
    if self.favorites.contains(&id) {
      store.remove_favorite(id)?;
      self.favorites.remove(&id);
    } else {
      store.add_favorite(id)?;
      self.favorites.insert(id);
    }
    Ok(self)
  }

  pub fn add_note(
    mut self,
    store: &LocalStore,
    resource_id: ResourceId,
    content: &str,
  ) -> Result<Self> {
    let note = store.add_note(resource_id, content)?;
    self.notes.entry(resource_id).or_default().push(note);
    Ok(self)
  }

  pub fn delete_note(mut self, store: &LocalStore, note_id: u64) -> Result<Self> {
    store.delete_note(note_id)?;
    for notes in self.notes.values_mut() {
      notes.retain(|n| n.id != note_id);
    }
    self.notes.retain(|_, notes| !notes.is_empty());
    Ok(self)
  }

  pub fn start_download(
    mut self,
    store: &LocalStore,
    resource_id: ResourceId,
  ) -> Result<(Self, Download)> {
    let title = self
      .resource(resource_id)
      .map(|r| r.title.clone())
      .unwrap_or_else(|| format!("Resource {}", resource_id));
    let download = store.add_download(resource_id, &title)?;
    self.downloads.push(download.clone());
    Ok((self, download))
  }

  /// Replace a tracked download with its latest stored version.
  pub fn with_download(mut self, download: Download) -> Self {
    match self.downloads.iter_mut().find(|d| d.id == download.id) {
      Some(existing) => *existing = download,
      None => self.downloads.push(download),
    }
    self
  }

  /// Favorite resources that still exist in the mirror.
  pub fn favorite_resources(&self) -> Vec<&Resource> {
    self
      .resources
      .iter()
      .filter(|r| self.favorites.contains(&r.id))
      .collect()
  }

  /// Notes for a resource, empty when the resource is unknown.
  pub fn notes_for(&self, id: ResourceId) -> &[Note] {
    if !self.is_known(id) {
      return &[];
    }
    self.notes.get(&id).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Downloads whose resource still exists.
  pub fn visible_downloads(&self) -> Vec<&Download> {
    self
      .downloads
      .iter()
      .filter(|d| self.is_known(d.resource_id))
      .collect()
  }
}
