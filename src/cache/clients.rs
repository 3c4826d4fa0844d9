//! Clients (open windows and workers) the controller can reach.
//!
//! The controller never shares memory with a client; it can only look up
//! client metadata, focus or open windows, and post messages down each
//! client's channel.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type ClientId = u64;

/// Messages the controller posts to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientMessage {
  CleanupComplete,
  SyncComplete { tag: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
  Window,
  Worker,
}

/// Snapshot of one client's metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
  pub id: ClientId,
  pub url: String,
  pub kind: ClientKind,
  pub focused: bool,
  /// Generation currently controlling this client
  pub controller: Option<String>,
}

struct ClientRecord {
  info: ClientInfo,
  tx: Option<mpsc::UnboundedSender<ClientMessage>>,
}

/// Registry of every client known to the controller.
#[derive(Default)]
pub struct ClientRegistry {
  next_id: AtomicU64,
  clients: Mutex<Vec<ClientRecord>>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Vec<ClientRecord>>> {
    self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn insert(
    &self,
    url: &str,
    kind: ClientKind,
    tx: Option<mpsc::UnboundedSender<ClientMessage>>,
  ) -> Result<ClientId> {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
    self.lock()?.push(ClientRecord {
      info: ClientInfo {
        id,
        url: url.to_string(),
        kind,
        focused: false,
        controller: None,
      },
      tx,
    });
    Ok(id)
  }

  /// Register a client and return the receiving end of its message channel.
  pub fn connect(
    &self,
    url: &str,
    kind: ClientKind,
  ) -> Result<(ClientId, mpsc::UnboundedReceiver<ClientMessage>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = self.insert(url, kind, Some(tx))?;
    debug!(client = id, url, "Client connected");
    Ok((id, rx))
  }

  pub fn disconnect(&self, id: ClientId) -> Result<()> {
    self.lock()?.retain(|c| c.info.id != id);
    Ok(())
  }

  /// Take control of every client on behalf of `generation`.
  pub fn claim(&self, generation: &str) -> Result<usize> {
    let mut clients = self.lock()?;
    for client in clients.iter_mut() {
      client.info.controller = Some(generation.to_string());
    }
    Ok(clients.len())
  }

  pub fn get(&self, id: ClientId) -> Result<Option<ClientInfo>> {
    Ok(
      self
        .lock()?
        .iter()
        .find(|c| c.info.id == id)
        .map(|c| c.info.clone()),
    )
  }

  /// Clients of `kind`; uncontrolled ones only when asked for.
  pub fn match_all(&self, kind: ClientKind, include_uncontrolled: bool) -> Result<Vec<ClientInfo>> {
    Ok(
      self
        .lock()?
        .iter()
        .filter(|c| c.info.kind == kind)
        .filter(|c| include_uncontrolled || c.info.controller.is_some())
        .map(|c| c.info.clone())
        .collect(),
    )
  }

  /// Give focus to one window, taking it from every other.
  pub fn focus(&self, id: ClientId) -> Result<ClientInfo> {
    let mut clients = self.lock()?;
    if !clients.iter().any(|c| c.info.id == id) {
      return Err(eyre!("No client with id {}", id));
    }
    let mut focused = None;
    for client in clients.iter_mut() {
      client.info.focused = client.info.id == id;
      if client.info.focused {
        focused = Some(client.info.clone());
      }
    }
    focused.ok_or_else(|| eyre!("No client with id {}", id))
  }

  /// Open a new focused window at `url`.
  pub fn open_window(&self, url: &str) -> Result<ClientId> {
    let id = self.insert(url, ClientKind::Window, None)?;
    self.focus(id)?;
    Ok(id)
  }

  /// Post a message to one client. A closed channel is logged, not fatal.
  pub fn post(&self, id: ClientId, message: ClientMessage) -> Result<()> {
    let clients = self.lock()?;
    let client = clients
      .iter()
      .find(|c| c.info.id == id)
      .ok_or_else(|| eyre!("No client with id {}", id))?;

    match &client.tx {
      Some(tx) if tx.send(message).is_ok() => {}
      _ => warn!(client = id, "Client is not listening for messages"),
    }
    Ok(())
  }

  /// Post a message to every listening client. Returns how many received it.
  pub fn broadcast(&self, message: ClientMessage) -> Result<usize> {
    let clients = self.lock()?;
    let delivered = clients
      .iter()
      .filter_map(|c| c.tx.as_ref())
      .filter(|tx| tx.send(message.clone()).is_ok())
      .count();
    Ok(delivered)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_claim_controls_every_client() {
    let registry = ClientRegistry::new();
    let (a, _rx_a) = registry.connect("http://localhost:8080/", ClientKind::Window).unwrap();
    let (b, _rx_b) = registry.connect("http://localhost:8080/notes", ClientKind::Window).unwrap();

    assert!(registry.match_all(ClientKind::Window, false).unwrap().is_empty());
    assert_eq!(registry.claim("study-v2").unwrap(), 2);

    for id in [a, b] {
      let info = registry.get(id).unwrap().unwrap();
      assert_eq!(info.controller.as_deref(), Some("study-v2"));
    }
  }

  #[test]
  fn test_focus_moves_between_windows() {
    let registry = ClientRegistry::new();
    let (a, _rx_a) = registry.connect("http://localhost:8080/", ClientKind::Window).unwrap();
    let b = registry.open_window("http://localhost:8080/").unwrap();

    assert!(registry.get(b).unwrap().unwrap().focused);
    registry.focus(a).unwrap();
    assert!(registry.get(a).unwrap().unwrap().focused);
    assert!(!registry.get(b).unwrap().unwrap().focused);
    assert!(registry.focus(99).is_err());
  }

  #[test]
  fn test_post_and_broadcast() {
    let registry = ClientRegistry::new();
    let (a, mut rx_a) = registry.connect("http://localhost:8080/", ClientKind::Window).unwrap();
    let (_b, mut rx_b) = registry.connect("http://localhost:8080/x", ClientKind::Window).unwrap();
    registry.open_window("http://localhost:8080/").unwrap();

    registry.post(a, ClientMessage::CleanupComplete).unwrap();
    assert_eq!(rx_a.try_recv().unwrap(), ClientMessage::CleanupComplete);
    assert!(rx_b.try_recv().is_err());

    let delivered = registry
      .broadcast(ClientMessage::SyncComplete {
        tag: "sync-resources".to_string(),
      })
      .unwrap();
    assert_eq!(delivered, 2);
    assert!(matches!(rx_b.try_recv().unwrap(), ClientMessage::SyncComplete { .. }));
  }

  #[test]
  fn test_disconnected_client_is_forgotten() {
    let registry = ClientRegistry::new();
    let (a, _rx_a) = registry.connect("http://localhost:8080/", ClientKind::Window).unwrap();
    let (b, _rx_b) = registry.connect("http://localhost:8080/", ClientKind::Window).unwrap();

    registry.disconnect(a).unwrap();
    assert_eq!(registry.get(a).unwrap(), None);
    assert!(registry.get(b).unwrap().is_some());
    assert_eq!(registry.broadcast(ClientMessage::CleanupComplete).unwrap(), 1);
  }

  #[test]
  fn test_message_wire_format() {
    let json = serde_json::to_value(ClientMessage::CleanupComplete).unwrap();
    assert_eq!(json, serde_json::json!({"action": "cleanupComplete"}));
  }
}
