//! Network fetcher seam.
//!
//! The strategy engine, interceptor, and sync coordinator all go through the
//! [`Fetcher`] trait so tests can substitute a scripted fetcher and count
//! network calls.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::cache::{HttpRequest, StoredResponse};

/// Performs a network fetch for a single request.
#[async_trait]
pub trait Fetcher: Send + Sync {
  /// Execute the request against the network.
  ///
  /// Returns Err only for transport-level failures (unreachable host,
  /// connection reset). HTTP error statuses come back as responses.
  async fn fetch(&self, request: &HttpRequest) -> Result<StoredResponse>;
}

/// Real fetcher backed by reqwest.
///
/// Path-absolute request URLs ("/api/notes") are resolved against the
/// configured upstream base.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  base: Url,
}

impl HttpFetcher {
  pub fn new(base_url: &str) -> Result<Self> {
    let base = Url::parse(base_url).map_err(|e| eyre!("Invalid upstream URL {}: {}", base_url, e))?;

    Ok(Self {
      client: reqwest::Client::new(),
      base,
    })
  }

  /// Resolve a possibly-relative request URL against the upstream base.
  fn resolve(&self, url: &str) -> Result<Url> {
    if url.starts_with('/') {
      self
        .base
        .join(url)
        .map_err(|e| eyre!("Failed to resolve {} against upstream: {}", url, e))
    } else {
      Url::parse(url).map_err(|e| eyre!("Invalid request URL {}: {}", url, e))
    }
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &HttpRequest) -> Result<StoredResponse> {
    let url = self.resolve(&request.url)?;

    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid HTTP method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, url);
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Network request failed for {}: {}", request.url, e))?;

    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body for {}: {}", request.url, e))?;

    Ok(StoredResponse {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or("").to_string(),
      headers,
      body: body.to_vec(),
    })
  }
}

#[cfg(test)]
pub mod mock {
  //! Scripted fetcher for tests: per-URL responses, an offline switch, and
  //! a call counter for asserting network-call counts.

  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;

  #[derive(Default)]
  pub struct MockFetcher {
    responses: Mutex<HashMap<String, StoredResponse>>,
    offline: AtomicBool,
    calls: AtomicUsize,
    seen: Mutex<Vec<HttpRequest>>,
  }

  impl MockFetcher {
    pub fn new() -> Self {
      Self::default()
    }

    /// Script a response for a URL.
    pub fn respond(&self, url: &str, response: StoredResponse) {
      self
        .responses
        .lock()
        .unwrap()
        .insert(url.to_string(), response);
    }

    /// Script a 200 response with the given body.
    pub fn respond_ok(&self, url: &str, body: &str) {
      self.respond(url, StoredResponse::new(200, body.as_bytes().to_vec()));
    }

    /// Simulate network loss: every fetch fails.
    pub fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
      self.seen.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &HttpRequest) -> Result<StoredResponse> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.seen.lock().unwrap().push(request.clone());

      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("network unreachable"));
      }

      self
        .responses
        .lock()
        .unwrap()
        .get(&request.url)
        .cloned()
        .ok_or_else(|| eyre!("no scripted response for {}", request.url))
    }
  }
}
