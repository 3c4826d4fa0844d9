//! One versioned asset cache worker: install, activate and fetch interception.

use color_eyre::{
  eyre::{eyre, WrapErr},
  Result,
};
use futures::future::try_join_all;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use super::clients::ClientRegistry;
use super::http::{Method, Request, Response, ResponseKind};
use super::storage::CacheStorage;
use super::traits::{FetchResult, Network};
use crate::config::Config;

/// What to cache and how, for one version of the app.
#[derive(Debug, Clone)]
pub struct CachePolicy {
  pub origin: Url,
  /// Name of the generation this version owns
  pub generation: String,
  pub manifest: Vec<String>,
  pub bypass: Vec<String>,
  pub offline_document: String,
}

impl CachePolicy {
  pub fn from_config(config: &Config) -> Result<Self> {
    Ok(Self {
      origin: config.origin_url()?,
      generation: config.cache.generation_name(),
      manifest: config.cache.manifest.clone(),
      bypass: config.cache.bypass.clone(),
      offline_document: config.cache.offline_document.clone(),
    })
  }

  /// Resolve a root-relative path against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid asset path '{}': {}", path, e))
  }

  pub fn is_bypassed(&self, url: &Url) -> bool {
    let path = url.path();
    self.bypass.iter().any(|pattern| path.contains(pattern.as_str()))
  }

  /// Same-origin GETs outside the bypass list are the only requests intercepted.
  pub fn intercepts(&self, request: &Request) -> bool {
    request.method == Method::Get
      && request.is_same_origin(&self.origin)
      && !self.is_bypassed(&request.url)
  }
}

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Uninstalled,
  Installing,
  /// Installed, waiting to be activated
  Waiting,
  Active,
  /// A newer worker is taking over
  Superseded,
  /// Discarded, either replaced or failed to install
  Removed,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      WorkerState::Uninstalled => "uninstalled",
      WorkerState::Installing => "installing",
      WorkerState::Waiting => "installed-waiting",
      WorkerState::Active => "active",
      WorkerState::Superseded => "superseded",
      WorkerState::Removed => "removed",
    };
    f.write_str(s)
  }
}

/// Asset cache worker bound to one cache generation.
pub struct AssetCacheController<S: CacheStorage, N: Network> {
  policy: CachePolicy,
  storage: Arc<S>,
  network: Arc<N>,
  clients: Arc<ClientRegistry>,
  state: Mutex<WorkerState>,
  skip_waiting: AtomicBool,
  /// Background cache writes started by fetch handling
  pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: CacheStorage, N: Network> AssetCacheController<S, N> {
  pub fn new(
    policy: CachePolicy,
    storage: Arc<S>,
    network: Arc<N>,
    clients: Arc<ClientRegistry>,
  ) -> Self {
    Self {
      policy,
      storage,
      network,
      clients,
      state: Mutex::new(WorkerState::Uninstalled),
      skip_waiting: AtomicBool::new(false),
      pending_writes: Mutex::new(Vec::new()),
    }
  }

  /// A worker for a generation that was already activated by an earlier run.
  pub fn restored(
    policy: CachePolicy,
    storage: Arc<S>,
    network: Arc<N>,
    clients: Arc<ClientRegistry>,
  ) -> Self {
    let worker = Self::new(policy, storage, network, clients);
    worker.set_state(WorkerState::Active);
    worker
  }

  pub fn policy(&self) -> &CachePolicy {
    &self.policy
  }

  pub fn generation(&self) -> &str {
    &self.policy.generation
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_state(&self, state: WorkerState) {
    *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
  }

  /// Move from `from` to `to`, or fail naming the current state.
  fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    if *state != from {
      return Err(eyre!(
        "Worker for {} is {}, expected {}",
        self.policy.generation,
        *state,
        from
      ));
    }
    *state = to;
    Ok(())
  }

  /// Ask to be activated as soon as installed, without waiting for old clients.
  pub fn skip_waiting(&self) {
    self.skip_waiting.store(true, Ordering::SeqCst);
  }

  pub fn wants_skip_waiting(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  /// Fetch every manifest asset and store them as a new generation.
  ///
  /// All-or-nothing: if any asset fails, nothing is written and the worker
  /// is discarded.
  pub async fn install(&self) -> Result<()> {
    self.transition(WorkerState::Uninstalled, WorkerState::Installing)?;
    info!(
      generation = %self.policy.generation,
      assets = self.policy.manifest.len(),
      "Installing asset cache"
    );

    match self.populate().await {
      Ok(count) => {
        self.set_state(WorkerState::Waiting);
        self.skip_waiting();
        info!(generation = %self.policy.generation, cached = count, "Install complete");
        Ok(())
      }
      Err(e) => {
        self.set_state(WorkerState::Removed);
        error!(generation = %self.policy.generation, error = %e, "Install failed");
        Err(e.wrap_err(format!("Failed to install {}", self.policy.generation)))
      }
    }
  }

  async fn populate(&self) -> Result<usize> {
    let requests = self
      .policy
      .manifest
      .iter()
      .map(|path| self.policy.resolve(path).map(Request::get))
      .collect::<Result<Vec<_>>>()?;

    let responses = try_join_all(requests.iter().map(|request| async move {
      let response = self
        .network
        .fetch(request)
        .await
        .wrap_err_with(|| format!("Failed to fetch {}", request.url))?;
      if !response.is_ok() {
        return Err(eyre!(
          "Failed to fetch {}: status {}",
          request.url,
          response.status
        ));
      }
      if response.kind != ResponseKind::Basic {
        return Err(eyre!(
          "Failed to fetch {}: {:?} response from another origin",
          request.url,
          response.kind
        ));
      }
      Ok(response)
    }))
    .await?;

    let entries: Vec<(Request, Response)> = requests.into_iter().zip(responses).collect();
    self.storage.populate(&self.policy.generation, &entries)?;
    Ok(entries.len())
  }

  /// Drop every stale generation, record this one as active and claim clients.
  pub fn activate(&self) -> Result<()> {
    let state = self.state();
    if state != WorkerState::Waiting {
      return Err(eyre!(
        "Worker for {} is {}, expected {}",
        self.policy.generation,
        state,
        WorkerState::Waiting
      ));
    }

    self
      .storage
      .mark_active(&self.policy.generation)
      .wrap_err_with(|| format!("Failed to activate {}", self.policy.generation))?;
    if let Err(e) = self.purge_stale() {
      warn!(generation = %self.policy.generation, error = %e, "Stale generation cleanup failed");
    }
    let claimed = self.clients.claim(&self.policy.generation)?;

    self.set_state(WorkerState::Active);
    info!(generation = %self.policy.generation, claimed, "Activated");
    Ok(())
  }

  /// Delete every generation other than this worker's. Returns the names removed.
  pub fn purge_stale(&self) -> Result<Vec<String>> {
    let names = self
      .storage
      .generation_names()
      .wrap_err("Failed to enumerate cache generations")?;

    let mut removed = Vec::new();
    for name in names
      .into_iter()
      .filter(|n| n != &self.policy.generation)
    {
      match self.storage.delete_generation(&name) {
        Ok(_) => {
          info!(generation = %name, "Deleted stale cache generation");
          removed.push(name);
        }
        Err(e) => warn!(generation = %name, error = %e, "Failed to delete cache generation"),
      }
    }
    Ok(removed)
  }

  pub fn supersede(&self) {
    self.set_state(WorkerState::Superseded);
  }

  /// Back to active after a successor failed to activate.
  pub fn reinstate(&self) {
    self.set_state(WorkerState::Active);
  }

  pub fn remove(&self) {
    self.set_state(WorkerState::Removed);
  }

  /// Answer one outgoing request: cache first, then network, then the
  /// offline document for HTML navigations.
  pub async fn handle_fetch(&self, request: Request) -> Result<FetchResult> {
    let serving = matches!(
      self.state(),
      WorkerState::Active | WorkerState::Superseded
    );
    if !serving || !self.policy.intercepts(&request) {
      return self
        .network
        .fetch(&request)
        .await
        .map(FetchResult::passthrough);
    }

    match self.storage.match_request(&self.policy.generation, &request) {
      Ok(Some(entry)) => {
        debug!(url = %request.url, cached_at = %entry.cached_at, "Cache hit");
        return Ok(FetchResult::from_cache(entry.response));
      }
      Ok(None) => debug!(url = %request.url, "Cache miss"),
      Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed, using network"),
    }

    match self.network.fetch(&request).await {
      Ok(response) => {
        if response.is_cacheable() {
          self.store_in_background(request, response.clone());
        }
        Ok(FetchResult::from_network(response))
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "Network fetch failed");
        if request.accepts_html() {
          if let Some(document) = self.offline_document() {
            return Ok(FetchResult::offline(document));
          }
        }
        Err(e.wrap_err(format!("Failed to fetch {}", request.url)))
      }
    }
  }

  /// The cached root document, trying the configured page then `/`.
  fn offline_document(&self) -> Option<Response> {
    [self.policy.offline_document.as_str(), "/"]
      .into_iter()
      .filter_map(|path| self.policy.resolve(path).ok())
      .find_map(|url| {
        match self
          .storage
          .match_request(&self.policy.generation, &Request::get(url.clone()))
        {
          Ok(entry) => entry.map(|e| e.response),
          Err(e) => {
            warn!(url = %url, error = %e, "Offline document lookup failed");
            None
          }
        }
      })
  }

  /// Write a response into this generation without making the caller wait.
  fn store_in_background(&self, request: Request, response: Response) {
    let storage = Arc::clone(&self.storage);
    let generation = self.policy.generation.clone();

    let handle = tokio::task::spawn_blocking(move || {
      if let Err(e) = storage.put(&generation, &request, &response) {
        warn!(url = %request.url, generation = %generation, error = %e, "Cache write failed");
      }
    });

    let mut pending = self.pending_writes.lock().unwrap_or_else(|e| e.into_inner());
    pending.retain(|h| !h.is_finished());
    pending.push(handle);
  }

  /// Wait for background cache writes started so far.
  pub async fn settle(&self) {
    let handles: Vec<_> = self
      .pending_writes
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .drain(..)
      .collect();
    for handle in handles {
      if let Err(e) = handle.await {
        warn!(error = %e, "Cache write task failed");
      }
    }
  }

  /// Replace one entry of this generation with a fresh response.
  pub fn refresh(&self, request: &Request, response: &Response) -> Result<()> {
    self
      .storage
      .put(&self.policy.generation, request, response)
      .wrap_err_with(|| format!("Failed to refresh {}", request.url))
  }

  pub fn network(&self) -> &Arc<N> {
    &self.network
  }
}
