//! Scripted network and fixtures for cache tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use super::controller::CachePolicy;
use super::http::{Request, Response};
use super::traits::Network;
use crate::config::Config;

pub const ORIGIN: &str = "http://localhost:8080/";

/// Policy for the default manifest at `version`.
pub fn policy(version: &str) -> CachePolicy {
  CachePolicy::from_config(&config(version)).unwrap()
}

pub fn config(version: &str) -> Config {
  let mut config = Config::default();
  config.origin = ORIGIN.to_string();
  config.cache.version = version.to_string();
  config
}

fn absolute(path: &str) -> String {
  Url::parse(ORIGIN).unwrap().join(path).unwrap().to_string()
}

enum Scripted {
  Respond(Response),
  Fail,
}

/// Network answering from a table keyed by absolute URL; anything else fails.
#[derive(Default)]
pub struct MockNetwork {
  routes: Mutex<HashMap<String, Scripted>>,
  calls: AtomicUsize,
  seen: Mutex<Vec<String>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Serve `<html>{path}</html>` for every path in the default manifest.
  pub fn with_manifest(self) -> Self {
    Config::default()
      .cache
      .manifest
      .iter()
      .fold(self, |network, path| {
        let body = format!("<html>{}</html>", path);
        network.respond(path, Response::new(200, body))
      })
  }

  pub fn respond(self, path: &str, response: Response) -> Self {
    self.respond_url(&absolute(path), response)
  }

  pub fn respond_url(self, url: &str, response: Response) -> Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Scripted::Respond(response));
    self
  }

  pub fn failing(self, path: &str) -> Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(absolute(path), Scripted::Fail);
    self
  }

  /// Change a route after construction.
  pub fn set(&self, path: &str, response: Option<Response>) {
    let route = match response {
      Some(response) => Scripted::Respond(response),
      None => Scripted::Fail,
    };
    self.routes.lock().unwrap().insert(absolute(path), route);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn reset_calls(&self) {
    self.calls.store(0, Ordering::SeqCst);
    self.seen.lock().unwrap().clear();
  }

  pub fn seen(&self) -> Vec<String> {
    self.seen.lock().unwrap().clone()
  }
}

impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let url = request.url.to_string();
    self.seen.lock().unwrap().push(url.clone());

    match self.routes.lock().unwrap().get(&url) {
      Some(Scripted::Respond(response)) => Ok(response.clone()),
      Some(Scripted::Fail) | None => Err(eyre!("network unreachable: {}", url)),
    }
  }
}
