//! Route policy table: which caching strategy applies to which API path.
//!
//! Policies are an explicit ordered list evaluated first-match-wins, with a
//! documented default (network-first, no TTL) for unmatched API paths.

use std::time::Duration;

/// Caching strategy for a matched route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Serve from cache while fresh, revalidate in the background.
  /// For rarely-changing structural data (folders).
  CacheFirst,
  /// Always try the network, fall back to cache when it fails.
  /// For freshness-sensitive user content (notes, todos).
  NetworkFirst,
  /// Never touch the network.
  CacheOnly,
  /// Never touch the cache. For auth and AI endpoints.
  NetworkOnly,
}

/// One entry in the route policy table.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
  /// Path prefix this policy applies to
  pub path_prefix: &'static str,
  pub strategy: Strategy,
  /// Zero means the entry never expires by time, only by replacement
  pub ttl: Duration,
}

/// Ordered route policy table, first prefix match wins.
#[derive(Debug, Clone)]
pub struct RouteTable {
  routes: Vec<RoutePolicy>,
}

/// Default API route policies.
const API_ROUTES: &[RoutePolicy] = &[
  RoutePolicy {
    path_prefix: "/api/folders",
    strategy: Strategy::CacheFirst,
    ttl: Duration::from_secs(300),
  },
  RoutePolicy {
    path_prefix: "/api/notes",
    strategy: Strategy::NetworkFirst,
    ttl: Duration::from_secs(60),
  },
  RoutePolicy {
    path_prefix: "/api/todos",
    strategy: Strategy::NetworkFirst,
    ttl: Duration::from_secs(60),
  },
  RoutePolicy {
    path_prefix: "/api/user",
    strategy: Strategy::NetworkFirst,
    ttl: Duration::from_secs(600),
  },
  RoutePolicy {
    path_prefix: "/api/auth",
    strategy: Strategy::NetworkOnly,
    ttl: Duration::ZERO,
  },
  RoutePolicy {
    path_prefix: "/api/ai",
    strategy: Strategy::NetworkOnly,
    ttl: Duration::ZERO,
  },
];

impl Default for RouteTable {
  fn default() -> Self {
    Self {
      routes: API_ROUTES.to_vec(),
    }
  }
}

impl RouteTable {
  /// Table with a custom route list (tests, alternative deployments).
  pub fn new(routes: Vec<RoutePolicy>) -> Self {
    Self { routes }
  }

  /// Resolve the policy for a request path.
  ///
  /// First prefix match wins. Unmatched paths get the default policy:
  /// network-first with no time expiry.
  pub fn resolve(&self, path: &str) -> RoutePolicy {
    self
      .routes
      .iter()
      .find(|route| path.starts_with(route.path_prefix))
      .cloned()
      .unwrap_or(RoutePolicy {
        path_prefix: "",
        strategy: Strategy::NetworkFirst,
        ttl: Duration::ZERO,
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_folders_are_cache_first() {
    let table = RouteTable::default();
    let policy = table.resolve("/api/folders");

    assert_eq!(policy.strategy, Strategy::CacheFirst);
    assert_eq!(policy.ttl, Duration::from_secs(300));
  }

  #[test]
  fn test_prefix_match_includes_subpaths() {
    let table = RouteTable::default();

    assert_eq!(
      table.resolve("/api/notes/42").strategy,
      Strategy::NetworkFirst
    );
    assert_eq!(
      table.resolve("/api/auth/login").strategy,
      Strategy::NetworkOnly
    );
  }

  #[test]
  fn test_unmatched_path_gets_default() {
    let table = RouteTable::default();
    let policy = table.resolve("/api/share");

    assert_eq!(policy.strategy, Strategy::NetworkFirst);
    assert_eq!(policy.ttl, Duration::ZERO);
  }

  #[test]
  fn test_first_match_wins_over_later_entries() {
    let table = RouteTable::new(vec![
      RoutePolicy {
        path_prefix: "/api/notes",
        strategy: Strategy::CacheOnly,
        ttl: Duration::ZERO,
      },
      RoutePolicy {
        path_prefix: "/api/notes/shared",
        strategy: Strategy::NetworkOnly,
        ttl: Duration::ZERO,
      },
    ]);

    // Both prefixes match; the earlier entry is the one that applies.
    assert_eq!(
      table.resolve("/api/notes/shared").strategy,
      Strategy::CacheOnly
    );
  }
}
