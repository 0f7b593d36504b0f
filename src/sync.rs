//! Sync coordinator: drains the pending-mutation queue against the network.
//!
//! Triggered by a background-sync tag or by an offline-to-online transition.
//! Items are replayed sequentially; each failure is isolated to its item.
//! A per-tag single-flight guard stops two triggers that fire close
//! together from double-sending the same queue items. Retries are bounded:
//! an item that keeps failing (say a permanent 400) is dropped at the cap
//! instead of being retried forever.

use color_eyre::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::cache::{Destination, HttpRequest};
use crate::config::Config;
use crate::db::OfflineStore;
use crate::fetch::Fetcher;

/// Replay attempts before a queue item is dropped.
const MAX_SYNC_ATTEMPTS: u32 = 5;

/// Background-sync tags the coordinator responds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTag {
  Notes,
  Todos,
}

impl SyncTag {
  pub const ALL: [SyncTag; 2] = [SyncTag::Notes, SyncTag::Todos];

  /// Wire tag ("sync-notes", "sync-todos").
  pub fn tag(self) -> &'static str {
    match self {
      SyncTag::Notes => "sync-notes",
      SyncTag::Todos => "sync-todos",
    }
  }

  /// Record kind this tag covers in the queue.
  pub fn kind(self) -> &'static str {
    match self {
      SyncTag::Notes => "note",
      SyncTag::Todos => "todo",
    }
  }

  pub fn parse(tag: &str) -> Option<Self> {
    match tag {
      "sync-notes" => Some(SyncTag::Notes),
      "sync-todos" => Some(SyncTag::Todos),
      _ => None,
    }
  }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
  /// Items replayed successfully and removed
  pub replayed: usize,
  /// Items that failed and remain queued
  pub failed: usize,
  /// Items dropped at the retry cap
  pub dropped: usize,
}

impl DrainStats {
  fn merge(&mut self, other: DrainStats) {
    self.replayed += other.replayed;
    self.failed += other.failed;
    self.dropped += other.dropped;
  }
}

/// Drains pending sync queue items against the network.
pub struct SyncCoordinator<F> {
  store: Arc<OfflineStore>,
  fetcher: Arc<F>,
  in_flight: Mutex<HashSet<SyncTag>>,
}

impl<F: Fetcher> SyncCoordinator<F> {
  pub fn new(store: Arc<OfflineStore>, fetcher: Arc<F>) -> Self {
    Self {
      store,
      fetcher,
      in_flight: Mutex::new(HashSet::new()),
    }
  }

  /// Drain the queue for one tag.
  ///
  /// A second drain for the same tag while one is running is a no-op.
  pub async fn drain(&self, tag: SyncTag) -> Result<DrainStats> {
    if !self.try_begin(tag) {
      debug!(tag = tag.tag(), "sync already in progress, skipping");
      return Ok(DrainStats::default());
    }

    let result = self.drain_inner(tag).await;
    self.finish(tag);
    result
  }

  /// Connectivity-restored trigger: drain every tag. Per-tag failures are
  /// logged and do not stop the remaining tags.
  pub async fn on_online(&self) -> DrainStats {
    let mut stats = DrainStats::default();

    for tag in SyncTag::ALL {
      match self.drain(tag).await {
        Ok(s) => stats.merge(s),
        Err(err) => warn!(tag = tag.tag(), "sync drain failed: {}", err),
      }
    }

    stats
  }

  async fn drain_inner(&self, tag: SyncTag) -> Result<DrainStats> {
    let items = self.store.sync_queue_for(tag.kind())?;
    let mut stats = DrainStats::default();

    if !items.is_empty() {
      info!(tag = tag.tag(), count = items.len(), "draining sync queue");
    }

    for item in items {
      let mut request = HttpRequest {
        method: item.method.clone(),
        url: item.url.clone(),
        destination: Destination::Other,
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: Some(serde_json::to_vec(&item.data)?),
      };
      // Items queued before login carry no token; fall back to the
      // environment at replay time.
      let token = item.token.clone().or_else(|| Config::get_api_token().ok());
      if let Some(token) = &token {
        request
          .headers
          .push(("authorization".to_string(), format!("Bearer {}", token)));
      }

      let succeeded = match self.fetcher.fetch(&request).await {
        Ok(response) if response.ok() => true,
        Ok(response) => {
          debug!(url = %item.url, status = response.status, "sync replay rejected");
          false
        }
        Err(err) => {
          debug!(url = %item.url, "sync replay failed: {}", err);
          false
        }
      };

      if succeeded {
        self.store.remove_sync_item(item.id)?;
        stats.replayed += 1;
      } else if item.retry_count + 1 >= MAX_SYNC_ATTEMPTS {
        warn!(
          url = %item.url,
          attempts = item.retry_count + 1,
          "dropping sync item at retry cap"
        );
        self.store.remove_sync_item(item.id)?;
        stats.dropped += 1;
      } else {
        self.store.bump_retry(item.id)?;
        stats.failed += 1;
      }
    }

    Ok(stats)
  }

  fn try_begin(&self, tag: SyncTag) -> bool {
    match self.in_flight.lock() {
      Ok(mut guard) => guard.insert(tag),
      Err(_) => false,
    }
  }

  fn finish(&self, tag: SyncTag) {
    if let Ok(mut guard) = self.in_flight.lock() {
      guard.remove(&tag);
    }
  }
}
