//! Core traits and types for the asset cache.

use color_eyre::Result;
use std::future::Future;

use super::http::{Request, Response};

/// Capability to perform a real network fetch.
///
/// An `Err` means the request never produced a response (offline, DNS
/// failure, refused connection). HTTP error statuses are `Ok` responses.
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// Result of an intercepted fetch, including where the response came from.
#[derive(Debug, Clone)]
pub struct FetchResult {
  pub response: Response,
  pub source: FetchSource,
}

impl FetchResult {
  pub fn from_cache(response: Response) -> Self {
    Self {
      response,
      source: FetchSource::Cache,
    }
  }

  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: FetchSource::Network,
    }
  }

  pub fn passthrough(response: Response) -> Self {
    Self {
      response,
      source: FetchSource::Passthrough,
    }
  }

  pub fn offline(response: Response) -> Self {
    Self {
      response,
      source: FetchSource::OfflineFallback,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
  /// Served from the active cache generation, no network round-trip
  Cache,
  /// Cache miss answered by the network
  Network,
  /// Not intercepted (non-GET, cross-origin, bypass-listed, or no active worker)
  Passthrough,
  /// Network failed; the cached offline document was served instead
  OfflineFallback,
}

impl std::fmt::Display for FetchSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      FetchSource::Cache => "cache",
      FetchSource::Network => "network",
      FetchSource::Passthrough => "passthrough",
      FetchSource::OfflineFallback => "offline-fallback",
    };
    f.write_str(s)
  }
}
