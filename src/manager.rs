//! Cache manager: request interception and lifecycle control.
//!
//! The manager classifies every outgoing request (API call, document
//! navigation, static asset) and runs the matching flow against its cache
//! partitions. It also owns the install/activate lifecycle: pre-warming the
//! static partition and garbage-collecting partitions from older deploys.
//!
//! Everything is injected (partition version, route table, storage backend,
//! fetcher), so tests construct independent managers over in-memory stores.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use url::Url;

use crate::cache::{
  cache_info, CacheStore, Destination, HttpRequest, RouteTable, StoredResponse, StrategyEngine,
};
use crate::commands::{Command, CommandReply};
use crate::fetch::Fetcher;

/// Injected cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
  /// Deploy version embedded in partition names; bump on every deploy to
  /// trigger garbage collection of the previous version's partitions.
  pub version: String,
  /// Page origin for the same-origin check. Absolute request URLs with a
  /// different origin pass through untouched.
  pub origin: Option<String>,
  /// Shell assets pre-warmed into the static partition on install.
  pub precache: Vec<String>,
  /// Offline fallback page, served when a navigation fails with no cache.
  pub offline_page: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: "2.0.0".to_string(),
      origin: None,
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
        "/vite.svg".to_string(),
        "/offline.html".to_string(),
      ],
      offline_page: "/offline.html".to_string(),
    }
  }
}

impl CacheConfig {
  pub fn static_partition(&self) -> String {
    format!("static-v{}", self.version)
  }

  pub fn dynamic_partition(&self) -> String {
    format!("dynamic-v{}", self.version)
  }

  pub fn api_partition(&self) -> String {
    format!("api-v{}", self.version)
  }

  /// The partitions that are current for this version.
  pub fn current_partitions(&self) -> [String; 3] {
    [
      self.static_partition(),
      self.dynamic_partition(),
      self.api_partition(),
    ]
  }
}

/// Lifecycle states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  /// Installed and eligible immediately (skip-waiting semantics)
  Installed,
  Activating,
  Active,
}

/// What interception decided for a request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// The manager produced a response (from cache, network, or synthesis)
  Response(StoredResponse),
  /// Cross-origin request: not intercepted, caller goes to the network
  Passthrough,
}

/// The cache manager.
pub struct CacheManager<S, F> {
  config: CacheConfig,
  routes: RouteTable,
  store: Arc<S>,
  fetcher: Arc<F>,
  engine: StrategyEngine<S, F>,
  state: Mutex<WorkerState>,
}

impl<S, F> CacheManager<S, F>
where
  S: CacheStore + 'static,
  F: Fetcher + 'static,
{
  pub fn new(config: CacheConfig, routes: RouteTable, store: Arc<S>, fetcher: Arc<F>) -> Self {
    let engine = StrategyEngine::new(Arc::clone(&store), Arc::clone(&fetcher));

    Self {
      config,
      routes,
      store,
      fetcher,
      engine,
      state: Mutex::new(WorkerState::Installing),
    }
  }

  pub fn state(&self) -> WorkerState {
    self
      .state
      .lock()
      .map(|s| *s)
      .unwrap_or(WorkerState::Installing)
  }

  fn set_state(&self, state: WorkerState) {
    if let Ok(mut guard) = self.state.lock() {
      *guard = state;
    }
  }

  // ==========================================================================
  // Lifecycle
  // ==========================================================================

  /// Install: pre-warm the static partition with the shell manifest.
  ///
  /// All-or-nothing: if any shell asset fails to fetch, nothing is stored
  /// and the install fails, leaving the previous version in charge. A
  /// broken deployment can never become active.
  pub async fn on_install(&self) -> Result<()> {
    info!(version = %self.config.version, "installing");
    self.set_state(WorkerState::Installing);

    self
      .prefetch_into(&self.config.static_partition(), &self.config.precache)
      .await?;

    self.set_state(WorkerState::Installed);
    Ok(())
  }

  /// Activate: delete every partition that doesn't belong to this version,
  /// then take control immediately.
  pub async fn on_activate(&self) -> Result<()> {
    info!(version = %self.config.version, "activating");
    self.set_state(WorkerState::Activating);

    let current = self.config.current_partitions();
    for name in self.store.partition_names()? {
      if !current.contains(&name) {
        info!(partition = %name, "deleting old cache partition");
        self.store.delete_partition(&name)?;
      }
    }

    self.set_state(WorkerState::Active);
    Ok(())
  }

  /// Fetch-and-store a list of URLs into one partition, all-or-nothing:
  /// every URL is fetched (concurrently) before anything is written.
  async fn prefetch_into(&self, partition: &str, urls: &[String]) -> Result<()> {
    let fetched = try_join_all(urls.iter().map(|url| async move {
      let request = HttpRequest::get(url.clone());
      let mut response = self.fetcher.fetch(&request).await?;
      if !response.ok() {
        return Err(eyre!("Failed to prefetch {}: status {}", url, response.status));
      }
      response.stamp_cache_date(chrono::Utc::now());
      Ok((request.cache_key(), response))
    }))
    .await?;

    for (key, response) in fetched {
      self.store.put(partition, &key, &response)?;
    }

    Ok(())
  }

  // ==========================================================================
  // Request interception
  // ==========================================================================

  /// Intercept one outgoing request.
  pub async fn on_fetch(&self, request: &HttpRequest) -> Result<FetchOutcome> {
    if !self.is_same_origin(&request.url) {
      return Ok(FetchOutcome::Passthrough);
    }

    let response = if request.path().contains("/api/") {
      self.handle_api_request(request).await?
    } else if request.destination == Destination::Document {
      self.handle_document_request(request).await?
    } else {
      self.handle_static_request(request).await?
    };

    Ok(FetchOutcome::Response(response))
  }

  /// API flow: resolve the route policy and let the engine run it against
  /// the api partition.
  async fn handle_api_request(&self, request: &HttpRequest) -> Result<StoredResponse> {
    let policy = self.routes.resolve(request.path());
    self
      .engine
      .execute(request, &self.config.api_partition(), &policy)
      .await
  }

  /// Document flow: network first, then any cached copy, then the offline
  /// page, then a synthetic "Offline" response. A navigation never
  /// surfaces a raw network error.
  async fn handle_document_request(&self, request: &HttpRequest) -> Result<StoredResponse> {
    match self.fetcher.fetch(request).await {
      Ok(mut response) if response.ok() => {
        response.stamp_cache_date(chrono::Utc::now());
        self
          .store
          .put(&self.config.dynamic_partition(), &request.cache_key(), &response)?;
        Ok(response)
      }
      _ => {
        let key = request.cache_key();
        if let Some(cached) = self.match_asset(&key)? {
          return Ok(cached);
        }

        let offline_key = HttpRequest::get(self.config.offline_page.clone()).cache_key();
        if let Some(page) = self.store.get(&self.config.static_partition(), &offline_key)? {
          return Ok(page);
        }

        Ok(StoredResponse::offline_fallback())
      }
    }
  }

  /// Static asset flow: cache first across static/dynamic partitions,
  /// network on miss. Failed image loads degrade to a synthetic 404; other
  /// asset failures propagate.
  async fn handle_static_request(&self, request: &HttpRequest) -> Result<StoredResponse> {
    let key = request.cache_key();
    if let Some(cached) = self.match_asset(&key)? {
      return Ok(cached);
    }

    match self.fetcher.fetch(request).await {
      Ok(mut response) => {
        if response.ok() && request.method == "GET" {
          response.stamp_cache_date(chrono::Utc::now());
          self
            .store
            .put(&self.config.dynamic_partition(), &key, &response)?;
        }
        Ok(response)
      }
      Err(err) => {
        if request.destination == Destination::Image {
          return Ok(StoredResponse::not_found());
        }
        Err(err)
      }
    }
  }

  /// Look an asset up in the static partition, then the dynamic one.
  fn match_asset(&self, key: &str) -> Result<Option<StoredResponse>> {
    if let Some(cached) = self.store.get(&self.config.static_partition(), key)? {
      return Ok(Some(cached));
    }
    self.store.get(&self.config.dynamic_partition(), key)
  }

  /// Same-origin check. Path-absolute URLs ("/api/notes") are same-origin
  /// by definition; absolute URLs must match the configured origin.
  /// Anything else, including relative references without a leading slash,
  /// is not intercepted and passes through.
  fn is_same_origin(&self, url: &str) -> bool {
    if url.starts_with('/') {
      return true;
    }

    let Some(origin) = &self.config.origin else {
      return false;
    };

    match (Url::parse(url), Url::parse(origin)) {
      (Ok(request_url), Ok(origin_url)) => request_url.origin() == origin_url.origin(),
      _ => false,
    }
  }

  // ==========================================================================
  // Command channel
  // ==========================================================================

  /// Handle a command from the hosting application.
  pub async fn on_message(&self, command: Command) -> Result<CommandReply> {
    match command {
      Command::SkipWaiting => {
        if self.state() == WorkerState::Installed {
          self.set_state(WorkerState::Active);
        }
        Ok(CommandReply::Ack)
      }
      Command::ClearCache { cache_name } => {
        match cache_name {
          Some(name) => self.store.delete_partition(&name)?,
          None => self.store.clear_all()?,
        }
        Ok(CommandReply::Ack)
      }
      Command::CacheUrls { urls } => {
        if let Err(err) = self
          .prefetch_into(&self.config.dynamic_partition(), &urls)
          .await
        {
          warn!("cache-urls prefetch failed: {}", err);
          return Err(err);
        }
        Ok(CommandReply::Ack)
      }
      Command::GetCacheInfo => Ok(CommandReply::CacheInfo(cache_info(self.store.as_ref())?)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryCacheStore;
  use crate::fetch::mock::MockFetcher;
  use std::time::Duration;

  fn manager() -> (
    CacheManager<MemoryCacheStore, MockFetcher>,
    Arc<MemoryCacheStore>,
    Arc<MockFetcher>,
  ) {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = Arc::new(MockFetcher::new());
    let manager = CacheManager::new(
      CacheConfig::default(),
      RouteTable::default(),
      Arc::clone(&store),
      Arc::clone(&fetcher),
    );
    (manager, store, fetcher)
  }

  fn script_shell(fetcher: &MockFetcher) {
    for url in ["/", "/index.html", "/manifest.json", "/vite.svg", "/offline.html"] {
      fetcher.respond_ok(url, &format!("asset {}", url));
    }
  }

  fn response_of(outcome: FetchOutcome) -> StoredResponse {
    match outcome {
      FetchOutcome::Response(resp) => resp,
      FetchOutcome::Passthrough => panic!("expected an intercepted response"),
    }
  }

  #[tokio::test]
  async fn test_install_prewarms_static_partition() {
    let (manager, store, fetcher) = manager();
    script_shell(&fetcher);

    manager.on_install().await.unwrap();

    assert_eq!(manager.state(), WorkerState::Installed);
    assert_eq!(store.entry_count("static-v2.0.0").unwrap(), 5);
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let (manager, store, fetcher) = manager();
    // /offline.html deliberately missing from the scripted responses
    for url in ["/", "/index.html", "/manifest.json", "/vite.svg"] {
      fetcher.respond_ok(url, "asset");
    }

    assert!(manager.on_install().await.is_err());
    assert_eq!(store.entry_count("static-v2.0.0").unwrap(), 0);
    assert_eq!(manager.state(), WorkerState::Installing);
  }

  #[tokio::test]
  async fn test_activate_deletes_old_versions() {
    let (manager, store, _fetcher) = manager();
    let entry = StoredResponse::new(200, b"x".to_vec());
    store.put("static-v1.0.0", "a", &entry).unwrap();
    store.put("api-v1.0.0", "b", &entry).unwrap();
    store.put("static-v2.0.0", "c", &entry).unwrap();

    manager.on_activate().await.unwrap();

    assert_eq!(manager.state(), WorkerState::Active);
    assert_eq!(store.partition_names().unwrap(), vec!["static-v2.0.0"]);
  }

  #[tokio::test]
  async fn test_cross_origin_requests_pass_through() {
    let (manager, _store, fetcher) = manager();
    let request = HttpRequest::get("https://cdn.example.com/lib.js");

    let outcome = manager.on_fetch(&request).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Passthrough));
    assert_eq!(fetcher.call_count(), 0);
  }

  #[tokio::test]
  async fn test_relative_reference_without_slash_passes_through() {
    let (manager, _store, fetcher) = manager();
    let request = HttpRequest::get("api/notes");

    let outcome = manager.on_fetch(&request).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Passthrough));
    assert_eq!(fetcher.call_count(), 0);
  }

  #[tokio::test]
  async fn test_absolute_same_origin_url_is_intercepted() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = Arc::new(MockFetcher::new());
    let config = CacheConfig {
      origin: Some("https://app.example.com".to_string()),
      ..CacheConfig::default()
    };
    let manager = CacheManager::new(
      config,
      RouteTable::default(),
      Arc::clone(&store),
      Arc::clone(&fetcher),
    );

    fetcher.respond_ok("https://app.example.com/api/notes", "[]");
    let request = HttpRequest::get("https://app.example.com/api/notes");

    let response = response_of(manager.on_fetch(&request).await.unwrap());
    assert_eq!(response.body, b"[]");
  }

  #[tokio::test]
  async fn test_api_folders_cache_first_scenario() {
    let (manager, _store, fetcher) = manager();
    fetcher.respond_ok("/api/folders", "folder list");
    let request = HttpRequest::get("/api/folders");

    // Empty cache: served from network
    let first = response_of(manager.on_fetch(&request).await.unwrap());
    assert_eq!(first.body, b"folder list");
    assert_eq!(fetcher.call_count(), 1);

    // Within the 5 minute window: served from cache, background call only
    let second = response_of(manager.on_fetch(&request).await.unwrap());
    assert_eq!(second.body, b"folder list");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fetcher.call_count(), 2);
  }

  #[tokio::test]
  async fn test_api_notes_offline_serves_cached() {
    let (manager, _store, fetcher) = manager();
    fetcher.respond_ok("/api/notes", "my notes");
    let request = HttpRequest::get("/api/notes");

    response_of(manager.on_fetch(&request).await.unwrap());

    fetcher.set_offline(true);
    let response = response_of(manager.on_fetch(&request).await.unwrap());
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"my notes");
  }

  #[tokio::test]
  async fn test_api_auth_is_never_cached() {
    let (manager, store, fetcher) = manager();
    fetcher.respond_ok("/api/auth/login", "session");
    let request = HttpRequest::get("/api/auth/login");

    response_of(manager.on_fetch(&request).await.unwrap());

    assert_eq!(store.entry_count("api-v2.0.0").unwrap(), 0);

    // And with the network down there is no fallback
    fetcher.set_offline(true);
    assert!(manager.on_fetch(&request).await.is_err());
  }

  #[tokio::test]
  async fn test_document_offline_falls_back_to_offline_page() {
    let (manager, _store, fetcher) = manager();
    script_shell(&fetcher);
    manager.on_install().await.unwrap();

    fetcher.set_offline(true);
    let request = HttpRequest::get_with_destination("/notes/42", Destination::Document);

    let response = response_of(manager.on_fetch(&request).await.unwrap());
    assert_eq!(response.body, b"asset /offline.html");
  }

  #[tokio::test]
  async fn test_document_offline_without_offline_page_synthesizes() {
    let (manager, _store, fetcher) = manager();
    fetcher.set_offline(true);
    let request = HttpRequest::get_with_destination("/notes/42", Destination::Document);

    let response = response_of(manager.on_fetch(&request).await.unwrap());
    assert_eq!(response.body, b"Offline");
  }

  #[tokio::test]
  async fn test_document_prefers_its_own_cached_copy() {
    let (manager, _store, fetcher) = manager();
    script_shell(&fetcher);
    manager.on_install().await.unwrap();

    let request = HttpRequest::get_with_destination("/notes/42", Destination::Document);
    fetcher.respond_ok("/notes/42", "the page");
    response_of(manager.on_fetch(&request).await.unwrap());

    fetcher.set_offline(true);
    let response = response_of(manager.on_fetch(&request).await.unwrap());
    assert_eq!(response.body, b"the page");
  }

  #[tokio::test]
  async fn test_static_assets_are_cache_first() {
    let (manager, _store, fetcher) = manager();
    fetcher.respond_ok("/app.js", "console.log(1)");
    let request = HttpRequest::get_with_destination("/app.js", Destination::Script);

    response_of(manager.on_fetch(&request).await.unwrap());
    assert_eq!(fetcher.call_count(), 1);

    // Second load comes from the dynamic partition, no network
    response_of(manager.on_fetch(&request).await.unwrap());
    assert_eq!(fetcher.call_count(), 1);
  }

  #[tokio::test]
  async fn test_failed_image_degrades_to_404() {
    let (manager, _store, fetcher) = manager();
    fetcher.set_offline(true);
    let request = HttpRequest::get_with_destination("/logo.png", Destination::Image);

    let response = response_of(manager.on_fetch(&request).await.unwrap());
    assert_eq!(response.status, 404);
  }

  #[tokio::test]
  async fn test_failed_script_propagates() {
    let (manager, _store, fetcher) = manager();
    fetcher.set_offline(true);
    let request = HttpRequest::get_with_destination("/app.js", Destination::Script);

    assert!(manager.on_fetch(&request).await.is_err());
  }

  #[tokio::test]
  async fn test_clear_cache_all_then_info_reports_zero() {
    let (manager, _store, fetcher) = manager();
    script_shell(&fetcher);
    manager.on_install().await.unwrap();

    let reply = manager
      .on_message(Command::ClearCache { cache_name: None })
      .await
      .unwrap();
    assert_eq!(reply, CommandReply::Ack);

    match manager.on_message(Command::GetCacheInfo).await.unwrap() {
      CommandReply::CacheInfo(info) => {
        assert!(info.values().all(|&count| count == 0));
      }
      other => panic!("unexpected reply: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_clear_cache_single_partition() {
    let (manager, store, fetcher) = manager();
    script_shell(&fetcher);
    manager.on_install().await.unwrap();
    store
      .put("api-v2.0.0", "k", &StoredResponse::new(200, b"x".to_vec()))
      .unwrap();

    manager
      .on_message(Command::ClearCache {
        cache_name: Some("api-v2.0.0".to_string()),
      })
      .await
      .unwrap();

    assert_eq!(store.entry_count("api-v2.0.0").unwrap(), 0);
    assert_eq!(store.entry_count("static-v2.0.0").unwrap(), 5);
  }

  #[tokio::test]
  async fn test_cache_urls_fills_dynamic_partition() {
    let (manager, store, fetcher) = manager();
    fetcher.respond_ok("/extra.css", "body {}");
    fetcher.respond_ok("/extra.js", "void 0");

    manager
      .on_message(Command::CacheUrls {
        urls: vec!["/extra.css".to_string(), "/extra.js".to_string()],
      })
      .await
      .unwrap();

    assert_eq!(store.entry_count("dynamic-v2.0.0").unwrap(), 2);
  }

  #[tokio::test]
  async fn test_skip_waiting_activates_installed_worker() {
    let (manager, _store, fetcher) = manager();
    script_shell(&fetcher);
    manager.on_install().await.unwrap();
    assert_eq!(manager.state(), WorkerState::Installed);

    manager.on_message(Command::SkipWaiting).await.unwrap();
    assert_eq!(manager.state(), WorkerState::Active);
  }
}
