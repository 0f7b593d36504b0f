//! Strategy engine: executes a resolved route policy for one request.
//!
//! Each strategy suspends at cache lookups and network fetches but runs its
//! own steps strictly in order. Background revalidation is the only detached
//! work: it is spawned, never awaited, and its errors are logged and dropped.

use chrono::Utc;
use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::fetch::Fetcher;

use super::policy::{RoutePolicy, Strategy};
use super::store::CacheStore;
use super::traits::{HttpRequest, StoredResponse};

/// Executes cache strategies against a store and a fetcher.
pub struct StrategyEngine<S, F> {
  store: Arc<S>,
  fetcher: Arc<F>,
}

impl<S, F> Clone for StrategyEngine<S, F> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      fetcher: Arc::clone(&self.fetcher),
    }
  }
}

impl<S, F> StrategyEngine<S, F>
where
  S: CacheStore + 'static,
  F: Fetcher + 'static,
{
  pub fn new(store: Arc<S>, fetcher: Arc<F>) -> Self {
    Self { store, fetcher }
  }

  /// Execute the policy's strategy for a request against one partition.
  pub async fn execute(
    &self,
    request: &HttpRequest,
    partition: &str,
    policy: &RoutePolicy,
  ) -> Result<StoredResponse> {
    match policy.strategy {
      Strategy::CacheFirst => self.cache_first(request, partition, policy.ttl).await,
      Strategy::NetworkFirst => self.network_first(request, partition).await,
      Strategy::CacheOnly => self.cache_only(request, partition),
      Strategy::NetworkOnly => self.network_only(request).await,
    }
  }

  /// Cache-first with a freshness window.
  ///
  /// A fresh cached entry is returned immediately and a background
  /// refetch-and-replace is spawned. A missing or stale entry goes to the
  /// network; if that fails, the stale entry (when present) is still served.
  pub async fn cache_first(
    &self,
    request: &HttpRequest,
    partition: &str,
    ttl: Duration,
  ) -> Result<StoredResponse> {
    let key = request.cache_key();
    let cached = self.store.get(partition, &key)?;

    if let Some(cached) = &cached {
      if is_fresh(cached, ttl) {
        self.spawn_revalidate(request.clone(), partition.to_string());
        return Ok(cached.clone());
      }
    }

    match self.fetch_and_store(request, partition).await {
      Ok(response) => Ok(response),
      Err(err) => match cached {
        // Network failed: serve the stale entry anyway
        Some(stale) => {
          debug!(url = %request.url, "network failed, serving stale cache entry");
          Ok(stale)
        }
        None => Err(err),
      },
    }
  }

  /// Network-first: cache is only a fallback and its TTL is not re-checked.
  pub async fn network_first(&self, request: &HttpRequest, partition: &str) -> Result<StoredResponse> {
    match self.fetch_and_store(request, partition).await {
      Ok(response) => Ok(response),
      Err(err) => {
        let key = request.cache_key();
        match self.store.get(partition, &key)? {
          Some(cached) => {
            debug!(url = %request.url, "network failed, falling back to cache");
            Ok(cached)
          }
          None => Err(err),
        }
      }
    }
  }

  /// Cache-only: never touches the network. A miss is a synthetic 404.
  pub fn cache_only(&self, request: &HttpRequest, partition: &str) -> Result<StoredResponse> {
    let key = request.cache_key();
    Ok(
      self
        .store
        .get(partition, &key)?
        .unwrap_or_else(StoredResponse::not_found),
    )
  }

  /// Network-only: plain fetch, no caching, no fallback.
  pub async fn network_only(&self, request: &HttpRequest) -> Result<StoredResponse> {
    self.fetcher.fetch(request).await
  }

  /// Fetch from the network; 2xx responses are stamped and stored before
  /// being returned. Non-2xx responses pass through uncached.
  async fn fetch_and_store(&self, request: &HttpRequest, partition: &str) -> Result<StoredResponse> {
    let mut response = self.fetcher.fetch(request).await?;

    if response.ok() {
      response.stamp_cache_date(Utc::now());
      self.store.put(partition, &request.cache_key(), &response)?;
    }

    Ok(response)
  }

  /// Detached refetch-and-replace. Not awaited by the request that
  /// triggered it; failures are logged, never surfaced.
  fn spawn_revalidate(&self, request: HttpRequest, partition: String) {
    let engine = self.clone();

    tokio::spawn(async move {
      if let Err(err) = engine.fetch_and_store(&request, &partition).await {
        warn!(url = %request.url, "background cache update failed: {}", err);
      }
    });
  }
}

/// Whether a cached entry is within its freshness window.
///
/// Zero TTL means the entry never expires by time. A missing or unparsable
/// cache-date stamp counts as stale.
fn is_fresh(response: &StoredResponse, ttl: Duration) -> bool {
  if ttl.is_zero() {
    return true;
  }

  let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);

  match response.cache_date() {
    Some(cached_at) => Utc::now() - cached_at < ttl,
    None => false,
  }
}
