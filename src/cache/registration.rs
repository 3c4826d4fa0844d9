//! Registration: which worker is active, which is waiting, and how a new
//! version takes over.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use super::clients::ClientRegistry;
use super::controller::{AssetCacheController, CachePolicy, WorkerState};
use super::http::Request;
use super::push::NotificationCenter;
use super::storage::CacheStorage;
use super::traits::{FetchResult, Network};
use crate::config::{Config, NotificationConfig, SyncConfig};

type Worker<S, N> = Arc<AssetCacheController<S, N>>;

/// Owns the active and waiting workers for one app origin.
pub struct Registration<S: CacheStorage, N: Network> {
  policy: CachePolicy,
  storage: Arc<S>,
  network: Arc<N>,
  clients: Arc<ClientRegistry>,
  pub(super) notifications: NotificationCenter,
  pub(super) notification_defaults: NotificationConfig,
  pub(super) sync: SyncConfig,
  active: RwLock<Option<Worker<S, N>>>,
  waiting: RwLock<Option<Worker<S, N>>>,
}

impl<S: CacheStorage, N: Network> Registration<S, N> {
  pub fn new(
    config: &Config,
    storage: Arc<S>,
    network: Arc<N>,
    clients: Arc<ClientRegistry>,
  ) -> Result<Self> {
    Ok(Self {
      policy: CachePolicy::from_config(config)?,
      storage,
      network,
      clients,
      notifications: NotificationCenter::new(),
      notification_defaults: config.notifications.clone(),
      sync: config.sync.clone(),
      active: RwLock::new(None),
      waiting: RwLock::new(None),
    })
  }

  pub fn policy(&self) -> &CachePolicy {
    &self.policy
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn network(&self) -> &Arc<N> {
    &self.network
  }

  pub fn clients(&self) -> &Arc<ClientRegistry> {
    &self.clients
  }

  pub fn notifications(&self) -> &NotificationCenter {
    &self.notifications
  }

  fn new_worker(&self) -> Worker<S, N> {
    Arc::new(AssetCacheController::new(
      self.policy.clone(),
      Arc::clone(&self.storage),
      Arc::clone(&self.network),
      Arc::clone(&self.clients),
    ))
  }

  pub fn active(&self) -> Option<Worker<S, N>> {
    self.active.read().unwrap_or_else(|e| e.into_inner()).clone()
  }

  pub fn waiting(&self) -> Option<Worker<S, N>> {
    self.waiting.read().unwrap_or_else(|e| e.into_inner()).clone()
  }

  /// Adopt the generation an earlier run activated, if it is this version's.
  pub fn restore(&self) -> Result<bool> {
    let stored = self.storage.active_generation()?;
    if stored.as_deref() != Some(self.policy.generation.as_str()) {
      return Ok(false);
    }

    let worker = Arc::new(AssetCacheController::restored(
      self.policy.clone(),
      Arc::clone(&self.storage),
      Arc::clone(&self.network),
      Arc::clone(&self.clients),
    ));
    *self.active.write().unwrap_or_else(|e| e.into_inner()) = Some(worker);
    info!(generation = %self.policy.generation, "Restored active cache generation");
    Ok(true)
  }

  /// Install a new worker for this version and activate it when it asks to
  /// skip waiting.
  ///
  /// A failed install leaves the current active worker untouched.
  pub async fn install(&self) -> Result<Worker<S, N>> {
    let worker = self.new_worker();
    worker.install().await?;

    let previous = self
      .waiting
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .replace(Arc::clone(&worker));
    if let Some(previous) = previous {
      previous.remove();
    }

    if worker.wants_skip_waiting() {
      self.promote()?;
    }
    Ok(worker)
  }

  /// Honour a skip-waiting request for the waiting worker, if there is one.
  pub fn skip_waiting(&self) -> Result<bool> {
    match self.waiting() {
      Some(worker) => {
        worker.skip_waiting();
        self.promote()?;
        Ok(true)
      }
      None => Ok(false),
    }
  }

  /// Activate the waiting worker, superseding the active one.
  fn promote(&self) -> Result<()> {
    let next = self
      .waiting
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .take()
      .ok_or_else(|| eyre!("No waiting worker to activate"))?;
    let previous = self.active();

    if let Some(previous) = &previous {
      previous.supersede();
    }

    if let Err(e) = next.activate() {
      warn!(generation = %next.generation(), error = %e, "Activation failed");
      if let Some(previous) = &previous {
        if previous.state() == WorkerState::Superseded {
          previous.reinstate();
        }
      }
      *self.waiting.write().unwrap_or_else(|e| e.into_inner()) = Some(next);
      return Err(e);
    }

    *self.active.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&next));
    if let Some(previous) = previous {
      previous.remove();
    }
    Ok(())
  }

  /// Route a request through the active worker, or straight to the network.
  pub async fn handle_fetch(&self, request: Request) -> Result<FetchResult> {
    match self.active() {
      Some(worker) => worker.handle_fetch(request).await,
      None => self
        .network
        .fetch(&request)
        .await
        .map(FetchResult::passthrough),
    }
  }

  /// Delete every generation but the active one.
  pub fn cleanup(&self) -> Result<Vec<String>> {
    match self.active() {
      Some(worker) => worker.purge_stale(),
      None => Ok(Vec::new()),
    }
  }

  /// Wait for background cache writes of the active worker.
  pub async fn settle(&self) {
    if let Some(worker) = self.active() {
      worker.settle().await;
    }
  }
}
