//! Worker event loop.
//!
//! Platform events are queued on one channel and dispatched to the
//! registration. Fetches run concurrently; every other event is handled in
//! arrival order so lifecycle changes never interleave.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cache::clients::{ClientId, ClientMessage};
use crate::cache::push::{ClickOutcome, Notification};
use crate::cache::sync::SyncOutcome;
use crate::cache::traits::FetchResult;
use crate::cache::{CacheStorage, Network, Registration, Request};

/// Worker events
#[derive(Debug)]
pub enum WorkerEvent {
  /// Install the current version, activating it if it skips waiting
  Install(oneshot::Sender<Result<String>>),
  /// Outgoing request from a controlled client
  Fetch(Request, oneshot::Sender<Result<FetchResult>>),
  /// Control message posted by a client
  Message {
    source: Option<ClientId>,
    data: Value,
    reply: oneshot::Sender<Result<Option<ClientMessage>>>,
  },
  /// Push delivery with an optional payload
  Push(Option<Vec<u8>>, oneshot::Sender<Notification>),
  NotificationClick(u64, oneshot::Sender<Result<ClickOutcome>>),
  /// Background sync with its tag
  Sync(String, oneshot::Sender<SyncOutcome>),
}

/// Sends events to a running worker loop.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
}

/// Start the event loop for `registration`. The loop ends when every handle
/// is dropped.
pub fn spawn_worker<S, N>(registration: Arc<Registration<S, N>>) -> WorkerHandle
where
  S: CacheStorage,
  N: Network,
{
  let (tx, mut rx) = mpsc::unbounded_channel();

  tokio::spawn(async move {
    while let Some(event) = rx.recv().await {
      dispatch(&registration, event).await;
    }
    debug!("Worker event loop stopped");
  });

  WorkerHandle { tx }
}

async fn dispatch<S, N>(registration: &Arc<Registration<S, N>>, event: WorkerEvent)
where
  S: CacheStorage,
  N: Network,
{
  match event {
    WorkerEvent::Install(reply) => {
      let result = registration
        .install()
        .await
        .map(|worker| worker.generation().to_string());
      respond(reply, result);
    }
    WorkerEvent::Fetch(request, reply) => {
      let registration = Arc::clone(registration);
      tokio::spawn(async move {
        respond(reply, registration.handle_fetch(request).await);
      });
    }
    WorkerEvent::Message { source, data, reply } => {
      respond(reply, registration.handle_message(source, &data));
    }
    WorkerEvent::Push(data, reply) => {
      respond(reply, registration.handle_push(data.as_deref()));
    }
    WorkerEvent::NotificationClick(id, reply) => {
      respond(reply, registration.handle_notification_click(id));
    }
    WorkerEvent::Sync(tag, reply) => {
      respond(reply, registration.handle_sync(&tag).await);
    }
  }
}

fn respond<T>(reply: oneshot::Sender<T>, value: T) {
  if reply.send(value).is_err() {
    warn!("Event sender went away before the reply");
  }
}

impl WorkerHandle {
  async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> WorkerEvent) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(make(reply))
      .map_err(|_| eyre!("Worker event loop has stopped"))?;
    rx.await.map_err(|e| eyre!("Worker dropped the event: {}", e))
  }

  /// Install and return the generation name.
  pub async fn install(&self) -> Result<String> {
    self.request(WorkerEvent::Install).await?
  }

  pub async fn fetch(&self, request: Request) -> Result<FetchResult> {
    self.request(|reply| WorkerEvent::Fetch(request, reply)).await?
  }

  pub async fn post_message(
    &self,
    source: Option<ClientId>,
    data: Value,
  ) -> Result<Option<ClientMessage>> {
    self
      .request(|reply| WorkerEvent::Message { source, data, reply })
      .await?
  }

  pub async fn push(&self, data: Option<Vec<u8>>) -> Result<Notification> {
    self.request(|reply| WorkerEvent::Push(data, reply)).await
  }

  pub async fn notification_click(&self, id: u64) -> Result<ClickOutcome> {
    self
      .request(|reply| WorkerEvent::NotificationClick(id, reply))
      .await?
  }

  pub async fn sync(&self, tag: impl Into<String>) -> Result<SyncOutcome> {
    let tag = tag.into();
    self.request(|reply| WorkerEvent::Sync(tag, reply)).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clients::{ClientKind, ClientRegistry};
  use crate::cache::storage::SqliteStorage;
  use crate::cache::testing::{config, MockNetwork, ORIGIN};
  use crate::cache::traits::FetchSource;
  use serde_json::json;
  use url::Url;

  fn registration(network: MockNetwork) -> Arc<Registration<SqliteStorage, MockNetwork>> {
    Arc::new(
      Registration::new(
        &config("v1"),
        Arc::new(SqliteStorage::open_in_memory().unwrap()),
        Arc::new(network),
        Arc::new(ClientRegistry::new()),
      )
      .unwrap(),
    )
  }

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  #[tokio::test]
  async fn test_install_then_fetch_from_cache() {
    let registration = registration(MockNetwork::new().with_manifest());
    let worker = spawn_worker(Arc::clone(&registration));

    assert_eq!(worker.install().await.unwrap(), "study-resources-v1");

    registration.network().reset_calls();
    let result = worker.fetch(Request::get(url("/styles.css"))).await.unwrap();
    assert_eq!(result.source, FetchSource::Cache);
    assert_eq!(registration.network().calls(), 0);
  }

  #[tokio::test]
  async fn test_failed_install_is_reported() {
    let registration = registration(MockNetwork::new().with_manifest().failing("/db.js"));
    let worker = spawn_worker(Arc::clone(&registration));

    assert!(worker.install().await.is_err());
    assert!(registration.active().is_none());
  }

  #[tokio::test]
  async fn test_message_push_click_and_sync() {
    let registration = registration(MockNetwork::new().with_manifest());
    let worker = spawn_worker(Arc::clone(&registration));
    worker.install().await.unwrap();

    let (client, mut inbox) = registration
      .clients()
      .connect(ORIGIN, ClientKind::Window)
      .unwrap();
    let reply = worker
      .post_message(Some(client), json!({"action": "cleanupCache"}))
      .await
      .unwrap();
    assert_eq!(reply, Some(ClientMessage::CleanupComplete));
    assert_eq!(inbox.recv().await, Some(ClientMessage::CleanupComplete));

    let ignored = worker.post_message(None, json!({"action": "dance"})).await.unwrap();
    assert_eq!(ignored, None);

    let notification = worker.push(None).await.unwrap();
    assert_eq!(notification.title, "Study Resources");

    let outcome = worker.notification_click(notification.id).await.unwrap();
    assert_eq!(outcome, ClickOutcome::Focused(client));

    assert_eq!(worker.sync("unknown-tag").await.unwrap(), SyncOutcome::Ignored);
  }
}
