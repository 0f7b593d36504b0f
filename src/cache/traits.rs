//! Core request/response types for the caching system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Header injected into stored responses to record when they were cached.
/// TTL evaluation reads this back out; the upstream server never sees it.
pub const CACHE_DATE_HEADER: &str = "x-cache-date";

/// What kind of resource a request is for.
///
/// Mirrors the browser notion of a request destination, reduced to the
/// categories the interceptor actually distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  /// Full page navigation
  Document,
  Image,
  Script,
  Style,
  Font,
  /// Anything else (fetch/XHR, workers, ...)
  Other,
}

/// An outgoing request as seen by the interceptor.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  /// HTTP method, uppercase ("GET", "POST", ...)
  pub method: String,
  /// Absolute URL, or path-absolute ("/api/notes") for same-origin requests
  pub url: String,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl HttpRequest {
  /// A plain GET for a URL, the common case for cacheable traffic.
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
      destination: Destination::Other,
      headers: Vec::new(),
      body: None,
    }
  }

  /// Same GET but tagged with a destination (document, image, ...).
  pub fn get_with_destination(url: impl Into<String>, destination: Destination) -> Self {
    Self {
      destination,
      ..Self::get(url)
    }
  }

  /// Path component of the URL (strips scheme/host if present).
  pub fn path(&self) -> &str {
    match self.url.find("://") {
      Some(idx) => {
        let rest = &self.url[idx + 3..];
        rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
      }
      None => &self.url,
    }
  }

  /// Stable cache key for this request.
  ///
  /// SHA256 over method + url for fixed-length keys that are safe to use
  /// as SQLite primary key components.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b":");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response as held in a cache partition: status, headers, body, plus the
/// injected cache-date header once stamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl StoredResponse {
  /// Build a response with a body and no extra headers.
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: default_status_text(status).to_string(),
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// Whether the status is in the 2xx range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value with the given name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Set a header, replacing any existing value.
  pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
    self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    self.headers.push((name.to_string(), value.into()));
  }

  /// Stamp the cache-date header with the given instant.
  pub fn stamp_cache_date(&mut self, now: DateTime<Utc>) {
    self.set_header(CACHE_DATE_HEADER, now.to_rfc3339());
  }

  /// Parse the cache-date header back out, if present and valid.
  pub fn cache_date(&self) -> Option<DateTime<Utc>> {
    self
      .header(CACHE_DATE_HEADER)
      .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
      .map(|dt| dt.with_timezone(&Utc))
  }

  /// Synthetic empty 404, used where a miss degrades gracefully
  /// (cache-only misses, failed image loads).
  pub fn not_found() -> Self {
    Self::new(404, Vec::new())
  }

  /// Last-resort offline response when no offline page is cached either.
  pub fn offline_fallback() -> Self {
    let mut resp = Self::new(200, "Offline".as_bytes().to_vec());
    resp.set_header("content-type", "text/plain");
    resp
  }
}

fn default_status_text(status: u16) -> &'static str {
  match status {
    200 => "OK",
    404 => "Not Found",
    _ => "",
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_key_is_stable_and_method_sensitive() {
    let get = HttpRequest::get("/api/notes");
    let mut post = HttpRequest::get("/api/notes");
    post.method = "POST".to_string();

    assert_eq!(get.cache_key(), HttpRequest::get("/api/notes").cache_key());
    assert_ne!(get.cache_key(), post.cache_key());
  }

  #[test]
  fn test_path_strips_origin() {
    let absolute = HttpRequest::get("https://app.example.com/api/notes?x=1");
    assert_eq!(absolute.path(), "/api/notes?x=1");

    let relative = HttpRequest::get("/api/notes");
    assert_eq!(relative.path(), "/api/notes");
  }

  #[test]
  fn test_cache_date_round_trip() {
    let mut resp = StoredResponse::new(200, b"{}".to_vec());
    assert!(resp.cache_date().is_none());

    let now = Utc::now();
    resp.stamp_cache_date(now);

    let parsed = resp.cache_date().expect("stamped date should parse");
    assert!((parsed - now).num_milliseconds().abs() < 1000);
  }

  #[test]
  fn test_set_header_replaces() {
    let mut resp = StoredResponse::new(200, Vec::new());
    resp.set_header("X-Test", "one");
    resp.set_header("x-test", "two");

    assert_eq!(resp.header("X-TEST"), Some("two"));
    assert_eq!(
      resp
        .headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("x-test"))
        .count(),
      1
    );
  }
}
