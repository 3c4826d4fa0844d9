use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::collection::{CollectionName, Entity};

pub type ResourceId = u64;

/// A study resource mirrored from the resource manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
  pub id: ResourceId,
  pub title: String,
  pub category: String,
  pub subject: String,
  #[serde(default)]
  pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  #[serde(default)]
  pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
  pub resource_id: ResourceId,
  pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
  pub id: u64,
  pub resource_id: ResourceId,
  pub content: String,
  pub created_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Download {
  pub id: u64,
  pub resource_id: ResourceId,
  pub title: String,
  /// Percentage, 0..=100
  pub progress: u8,
  pub started_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
}

impl Download {
  pub fn is_complete(&self) -> bool {
    self.progress >= 100
  }

  /// Move progress forward to `progress` (clamped to 100). Lower values are
  /// ignored. Returns whether anything changed.
  pub fn advance_to(&mut self, progress: u8) -> bool {
    let progress = progress.min(100);
    if progress <= self.progress {
      return false;
    }
    self.progress = progress;
    if self.is_complete() && self.completed_at.is_none() {
      self.completed_at = Some(Utc::now());
    }
    true
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
  pub key: String,
  pub value: Value,
}

impl Entity for Resource {
  const COLLECTION: CollectionName = CollectionName::Resources;

  fn key(&self) -> String {
    self.id.to_string()
  }
}

impl Entity for Favorite {
  const COLLECTION: CollectionName = CollectionName::Favorites;

  fn key(&self) -> String {
    self.resource_id.to_string()
  }

  fn resource_id(&self) -> Option<ResourceId> {
    Some(self.resource_id)
  }
}

impl Entity for Note {
  const COLLECTION: CollectionName = CollectionName::Notes;

  fn key(&self) -> String {
    self.id.to_string()
  }

  fn resource_id(&self) -> Option<ResourceId> {
    Some(self.resource_id)
  }
}

impl Entity for Download {
  const COLLECTION: CollectionName = CollectionName::Downloads;

  fn key(&self) -> String {
    self.id.to_string()
  }

  fn resource_id(&self) -> Option<ResourceId> {
    Some(self.resource_id)
  }
}

impl Entity for Setting {
  const COLLECTION: CollectionName = CollectionName::Settings;

  fn key(&self) -> String {
    self.key.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn download(progress: u8) -> Download {
    Download {
      id: 1,
      resource_id: 5,
      title: "Calculus notes".to_string(),
      progress,
      started_at: Utc::now(),
      completed_at: None,
    }
  }

  #[test]
  fn test_download_progress_only_moves_forward() {
    let mut d = download(40);
    assert!(!d.advance_to(30));
    assert_eq!(d.progress, 40);
    assert!(d.advance_to(70));
    assert_eq!(d.progress, 70);
    assert!(d.completed_at.is_none());
  }

  #[test]
  fn test_download_completion_is_stamped_once() {
    let mut d = download(90);
    assert!(d.advance_to(250));
    assert_eq!(d.progress, 100);
    assert!(d.is_complete());
    let stamped = d.completed_at;
    assert!(stamped.is_some());
    assert!(!d.advance_to(100));
    assert_eq!(d.completed_at, stamped);
  }

  #[test]
  fn test_resource_accepts_minimal_json() {
    let resource: Resource = serde_json::from_str(
      r#"{"id": 5, "title": "Linear Algebra", "category": "pdf", "subject": "Mathematics"}"#,
    )
    .unwrap();
    assert_eq!(resource.id, 5);
    assert!(resource.tags.is_empty());
    assert_eq!(resource.url, None);
  }
}
