//! Simulated download progress for offline copies of resources.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::store::{Download, LocalStore};

/// Advance a download by `step` percent every `tick`, persisting each step,
/// until it reaches 100. Each stored update is also sent on `progress` when
/// a receiver is attached.
pub async fn simulate_download(
  store: Arc<LocalStore>,
  download_id: u64,
  step: u8,
  tick: Duration,
  progress: Option<mpsc::UnboundedSender<Download>>,
) -> Result<Download> {
  let step = step.max(1);
  let mut interval = tokio::time::interval(tick);
  // First tick completes immediately
  interval.tick().await;

  loop {
    interval.tick().await;

    let current = store
      .get_downloads()?
      .into_iter()
      .find(|d| d.id == download_id)
      .map(|d| d.progress)
      .unwrap_or(0);
    let next = current.saturating_add(step).min(100);
    let download = store.update_download(download_id, next)?;
    debug!(id = download_id, progress = download.progress, "Download progress");

    if let Some(tx) = &progress {
      // Receiver may have gone away; progress still persists
      let _ = tx.send(download.clone());
    }

    if download.is_complete() {
      info!(id = download_id, title = %download.title, "Download complete");
      return Ok(download);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_simulation_stops_at_100() {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let download = store.add_download(3, "Genetics.pdf").unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let done = simulate_download(
      Arc::clone(&store),
      download.id,
      30,
      Duration::from_millis(1),
      Some(tx),
    )
    .await
    .unwrap();

    assert_eq!(done.progress, 100);
    let mut seen = Vec::new();
    while let Ok(update) = rx.try_recv() {
      seen.push(update.progress);
    }
    assert_eq!(seen, vec![30, 60, 90, 100]);

    let stored = store.get_downloads().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].progress, 100);
  }

  #[tokio::test]
  async fn test_simulation_fails_for_unknown_download() {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let result = simulate_download(store, 42, 10, Duration::from_millis(1), None).await;
    assert!(result.is_err());
  }
}
