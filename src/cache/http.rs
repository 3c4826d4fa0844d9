//! Request and response values seen by the asset cache.
//!
//! These mirror only what the cache controller needs to decide on a request:
//! method, URL and headers on the way out; status, headers, body and response
//! classification on the way back.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// HTTP method of an intercepted request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Other(String),
}

impl Method {
  pub fn parse(s: &str) -> Self {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Method::Get,
      "HEAD" => Method::Head,
      "POST" => Method::Post,
      "PUT" => Method::Put,
      "PATCH" => Method::Patch,
      "DELETE" => Method::Delete,
      other => Method::Other(other.to_string()),
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Other(m) => m,
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// An outgoing request
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  /// Header names are stored lowercase
  pub headers: BTreeMap<String, String>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: BTreeMap::new(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self
      .headers
      .insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  /// Whether the caller will take an HTML document (navigations do).
  pub fn accepts_html(&self) -> bool {
    self
      .header("accept")
      .map(|accept| accept.to_ascii_lowercase().contains("text/html"))
      .unwrap_or(false)
  }

  pub fn is_same_origin(&self, origin: &Url) -> bool {
    self.url.origin() == origin.origin()
  }

  /// Normalized identity used for cache lookups: method plus URL without fragment.
  pub fn cache_identity(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    format!("{} {}", self.method, url)
  }

  /// SHA256 of the normalized identity, for stable fixed-length keys.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.cache_identity().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// How the response relates to the requesting origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  /// Same-origin response
  Basic,
  /// Cross-origin response with readable body
  Cors,
  /// Cross-origin response the caller cannot inspect
  Opaque,
  /// Network error placeholder
  Error,
}

/// A response, or a snapshot of one read back from the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
  /// Whether a redirect was followed to produce this response
  #[serde(default)]
  pub redirected: bool,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
      kind: ResponseKind::Basic,
      redirected: false,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self
      .headers
      .insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn with_kind(mut self, kind: ResponseKind) -> Self {
    self.kind = kind;
    self
  }

  /// 2xx status
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only plain same-origin 200s are written to the cache.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.kind == ResponseKind::Basic && !self.redirected
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_accepts_html() {
    let nav = Request::get(url("http://localhost:8080/notes"))
      .with_header("Accept", "text/html,application/xhtml+xml");
    let json = Request::get(url("http://localhost:8080/data.json"))
      .with_header("accept", "application/json");
    let bare = Request::get(url("http://localhost:8080/data.json"));

    assert!(nav.accepts_html());
    assert!(!json.accepts_html());
    assert!(!bare.accepts_html());
  }

  #[test]
  fn test_cache_key_ignores_fragment_but_not_method() {
    let a = Request::get(url("http://localhost:8080/index.html#top"));
    let b = Request::get(url("http://localhost:8080/index.html"));
    let c = Request::new(Method::Head, url("http://localhost:8080/index.html"));

    assert_eq!(a.cache_key(), b.cache_key());
    assert_ne!(a.cache_key(), c.cache_key());
    assert_eq!(a.cache_key().len(), 64);
  }

  #[test]
  fn test_same_origin() {
    let origin = url("http://localhost:8080/");
    assert!(Request::get(url("http://localhost:8080/a.css")).is_same_origin(&origin));
    assert!(!Request::get(url("https://cdn.example.com/a.css")).is_same_origin(&origin));
  }

  #[test]
  fn test_cacheable_requires_basic_200_without_redirect() {
    assert!(Response::new(200, "ok").is_cacheable());
    assert!(!Response::new(201, "created").is_cacheable());
    assert!(!Response::new(200, "x")
      .with_kind(ResponseKind::Opaque)
      .is_cacheable());

    let mut redirected = Response::new(200, "x");
    redirected.redirected = true;
    assert!(!redirected.is_cacheable());
  }

  #[test]
  fn test_method_parse_is_case_insensitive() {
    assert_eq!(Method::parse("get"), Method::Get);
    assert_eq!(Method::parse("Post"), Method::Post);
    assert_eq!(Method::parse("purge"), Method::Other("PURGE".to_string()));
  }
}
