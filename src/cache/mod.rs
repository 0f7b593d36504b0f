//! Response caching layer: partitioned storage, route policies, and the
//! strategy engine that decides cache vs. network per request.
//!
//! - Partitions are named, versioned buckets (static/dynamic/api); old
//!   versions are garbage collected on activation.
//! - Route policies map API path prefixes to one of four strategies with a
//!   freshness TTL.
//! - The engine executes exactly one strategy per request and owns the
//!   stale-while-revalidate background refresh.

pub mod engine;
pub mod policy;
pub mod store;
pub mod traits;

pub use engine::StrategyEngine;
pub use policy::{RoutePolicy, RouteTable, Strategy};
pub use store::{cache_info, CacheStore, MemoryCacheStore, SqliteCacheStore};
pub use traits::{Destination, HttpRequest, StoredResponse};
