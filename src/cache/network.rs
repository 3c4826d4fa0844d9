//! Real network access through reqwest.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use super::http::{Request, Response, ResponseKind};
use super::traits::Network;

/// HTTP client used for cache misses, installs and sync.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

/// Kind of a response and whether it was redirected, judged from the URL
/// that was asked for and the URL that finally answered.
pub fn classify(requested: &Url, answered: &Url) -> (ResponseKind, bool) {
  let kind = if answered.origin() == requested.origin() {
    ResponseKind::Basic
  } else {
    ResponseKind::Cors
  };
  (kind, answered != requested)
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

    let (kind, redirected) = classify(&request.url, response.url());
    let status = response.status().as_u16();

    let headers: BTreeMap<String, String> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
      kind,
      redirected,
    })
  }
}
