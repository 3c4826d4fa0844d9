//! Control messages sent from the foreground app to the controller.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::clients::{ClientId, ClientMessage};
use super::registration::Registration;
use super::storage::CacheStorage;
use super::traits::Network;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlMessage {
  /// Activate the waiting worker now
  SkipWaiting,
  /// Delete every non-current cache generation
  CleanupCache,
}

impl<S: CacheStorage, N: Network> Registration<S, N> {
  /// Handle one message posted by `source`. Unknown messages are ignored.
  ///
  /// Returns the reply that was posted back, if any.
  pub fn handle_message(
    &self,
    source: Option<ClientId>,
    data: &Value,
  ) -> Result<Option<ClientMessage>> {
    let message: ControlMessage = match serde_json::from_value(data.clone()) {
      Ok(message) => message,
      Err(e) => {
        warn!(error = %e, "Ignoring unrecognised message");
        return Ok(None);
      }
    };

    match message {
      ControlMessage::SkipWaiting => {
        let promoted = self.skip_waiting()?;
        info!(promoted, "Skip waiting requested");
        Ok(None)
      }
      ControlMessage::CleanupCache => {
        let removed = self.cleanup()?;
        info!(removed = removed.len(), "Cache cleanup requested");

        let reply = ClientMessage::CleanupComplete;
        match source {
          Some(client) => self.clients().post(client, reply.clone())?,
          None => warn!("Cleanup request has no source client to reply to"),
        }
        Ok(Some(reply))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clients::{ClientKind, ClientRegistry};
  use crate::cache::http::{Request, Response};
  use crate::cache::storage::SqliteStorage;
  use crate::cache::testing::{config, policy, MockNetwork, ORIGIN};
  use serde_json::json;
  use std::sync::Arc;

  fn registration(storage: Arc<SqliteStorage>) -> Registration<SqliteStorage, MockNetwork> {
    Registration::new(
      &config("v1"),
      storage,
      Arc::new(MockNetwork::new().with_manifest()),
      Arc::new(ClientRegistry::new()),
    )
    .unwrap()
  }

  #[test]
  fn test_message_wire_format() {
    let parsed: ControlMessage = serde_json::from_value(json!({"action": "skipWaiting"})).unwrap();
    assert_eq!(parsed, ControlMessage::SkipWaiting);
    let parsed: ControlMessage = serde_json::from_value(json!({"action": "cleanupCache"})).unwrap();
    assert_eq!(parsed, ControlMessage::CleanupCache);
  }

  #[tokio::test]
  async fn test_cleanup_replies_to_sender() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let reg = registration(Arc::clone(&storage));
    reg.install().await.unwrap();
    let stale = Request::get(policy("v1").resolve("/old.css").unwrap());
    storage.put("study-resources-v0", &stale, &Response::new(200, "old")).unwrap();

    let clients = reg.clients();
    let (sender, mut rx) = clients.connect(ORIGIN, ClientKind::Window).unwrap();
    let (_other, mut other_rx) = clients.connect(ORIGIN, ClientKind::Window).unwrap();

    let reply = reg
      .handle_message(Some(sender), &json!({"action": "cleanupCache"}))
      .unwrap();

    assert_eq!(reply, Some(ClientMessage::CleanupComplete));
    assert_eq!(rx.try_recv().unwrap(), ClientMessage::CleanupComplete);
    assert!(other_rx.try_recv().is_err());
    assert_eq!(storage.generation_names().unwrap(), vec!["study-resources-v1"]);
  }

  #[tokio::test]
  async fn test_unknown_message_is_ignored() {
    let reg = registration(Arc::new(SqliteStorage::open_in_memory().unwrap()));
    assert_eq!(reg.handle_message(None, &json!({"action": "reboot"})).unwrap(), None);
    assert_eq!(reg.handle_message(None, &json!("hello")).unwrap(), None);
  }

  #[tokio::test]
  async fn test_skip_waiting_without_waiting_worker() {
    let reg = registration(Arc::new(SqliteStorage::open_in_memory().unwrap()));
    assert_eq!(reg.handle_message(None, &json!({"action": "skipWaiting"})).unwrap(), None);
    assert!(reg.active().is_none());
  }
}
