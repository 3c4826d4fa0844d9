//! Background sync: refresh the resource manifest when the platform asks.

use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::clients::ClientMessage;
use super::http::Request;
use super::registration::Registration;
use super::storage::CacheStorage;
use super::traits::Network;

/// Sync tags the controller recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTag {
  /// One-off background sync
  SyncResources,
  /// Periodic background sync
  UpdateResources,
}

impl SyncTag {
  pub fn as_str(&self) -> &'static str {
    match self {
      SyncTag::SyncResources => "sync-resources",
      SyncTag::UpdateResources => "update-resources",
    }
  }
}

impl fmt::Display for SyncTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SyncTag {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "sync-resources" => Ok(SyncTag::SyncResources),
      "update-resources" => Ok(SyncTag::UpdateResources),
      other => Err(format!("unknown sync tag '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  /// Manifest fetched and written to the active generation
  Refreshed,
  /// Manifest fetched, but no active generation to store it in
  Fetched,
  /// Tag not recognised
  Ignored,
  /// Refresh failed; logged, never reported to the scheduler
  Failed,
}

impl<S: CacheStorage, N: Network> Registration<S, N> {
  /// Run one sync event. Never returns an error so the scheduler does not
  /// retry a permanently failing sync.
  pub async fn handle_sync(&self, tag: &str) -> SyncOutcome {
    let tag = match tag.parse::<SyncTag>() {
      Ok(tag) => tag,
      Err(e) => {
        debug!(error = %e, "Ignoring sync event");
        return SyncOutcome::Ignored;
      }
    };

    let outcome = match self.refresh_resources().await {
      Ok(outcome) => outcome,
      Err(e) => {
        warn!(tag = %tag, error = %e, "Background sync failed");
        return SyncOutcome::Failed;
      }
    };

    if let Err(e) = self.clients().broadcast(ClientMessage::SyncComplete {
      tag: tag.to_string(),
    }) {
      warn!(tag = %tag, error = %e, "Failed to announce sync completion");
    }
    self.notifications.show(
      self.notification_defaults.title.clone(),
      "Study resources updated".to_string(),
      self.notification_defaults.icon.clone(),
      self.notification_defaults.badge.clone(),
      tag.as_str(),
      self.policy().origin.to_string(),
    );
    info!(tag = %tag, ?outcome, "Background sync complete");
    outcome
  }

  async fn refresh_resources(&self) -> color_eyre::Result<SyncOutcome> {
    let url = self.policy().resolve(&self.sync.resources_path)?;
    let request = Request::get(url);
    let response = self.network().fetch(&request).await?;

    if !response.is_ok() {
      return Err(color_eyre::eyre::eyre!(
        "Resource manifest {} returned status {}",
        request.url,
        response.status
      ));
    }

    match self.active() {
      Some(worker) if response.is_cacheable() => {
        worker.refresh(&request, &response)?;
        Ok(SyncOutcome::Refreshed)
      }
      _ => Ok(SyncOutcome::Fetched),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clients::{ClientKind, ClientRegistry};
  use crate::cache::http::Response;
  use crate::cache::storage::SqliteStorage;
  use crate::cache::testing::{config, MockNetwork, ORIGIN};
  use crate::cache::traits::FetchSource;
  use std::sync::Arc;

  fn registration(network: MockNetwork) -> Registration<SqliteStorage, MockNetwork> {
    Registration::new(
      &config("v1"),
      Arc::new(SqliteStorage::open_in_memory().unwrap()),
      Arc::new(network.with_manifest()),
      Arc::new(ClientRegistry::new()),
    )
    .unwrap()
  }

  #[test]
  fn test_tag_parsing() {
    assert_eq!("sync-resources".parse::<SyncTag>(), Ok(SyncTag::SyncResources));
    assert_eq!("update-resources".parse::<SyncTag>(), Ok(SyncTag::UpdateResources));
    assert!("sync-everything".parse::<SyncTag>().is_err());
  }

  #[tokio::test]
  async fn test_sync_refreshes_manifest_and_notifies() {
    let network = MockNetwork::new().respond("/data/resources.json", Response::new(200, "[]"));
    let reg = registration(network);
    reg.install().await.unwrap();
    let (_client, mut rx) = reg.clients().connect(ORIGIN, ClientKind::Window).unwrap();

    assert_eq!(reg.handle_sync("sync-resources").await, SyncOutcome::Refreshed);
    assert_eq!(
      rx.try_recv().unwrap(),
      ClientMessage::SyncComplete {
        tag: "sync-resources".to_string()
      }
    );
    assert_eq!(reg.notifications().shown().len(), 1);

    reg.network().set("/data/resources.json", Some(Response::new(200, "[{}]")));
    reg.handle_sync("update-resources").await;
    reg.network().set("/data/resources.json", None);

    let url = reg.policy().resolve("/data/resources.json").unwrap();
    let cached = reg.handle_fetch(Request::get(url)).await.unwrap();
    assert_eq!(cached.source, FetchSource::Cache);
    assert_eq!(cached.response.body, b"[{}]");
  }

  #[tokio::test]
  async fn test_sync_failure_is_swallowed() {
    let reg = registration(MockNetwork::new().failing("/data/resources.json"));
    reg.install().await.unwrap();
    let (_client, mut rx) = reg.clients().connect(ORIGIN, ClientKind::Window).unwrap();

    assert_eq!(reg.handle_sync("sync-resources").await, SyncOutcome::Failed);
    assert!(rx.try_recv().is_err());

    reg.network().set("/data/resources.json", Some(Response::new(500, "down")));
    assert_eq!(reg.handle_sync("update-resources").await, SyncOutcome::Failed);
  }

  #[tokio::test]
  async fn test_unknown_tag_is_ignored() {
    let reg = registration(MockNetwork::new());
    assert_eq!(reg.handle_sync("upload-notes").await, SyncOutcome::Ignored);
    assert_eq!(reg.network().calls(), 0);
  }
}
