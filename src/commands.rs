//! Typed command channel between the hosting application and the cache
//! manager.
//!
//! The wire shape is `{ type, payload }`, so the same protocol works over
//! any message channel that carries JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Commands the manager accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
  /// Force immediate activation of a waiting new version.
  SkipWaiting,
  /// Delete one named partition, or all partitions if none is given.
  ClearCache { cache_name: Option<String> },
  /// Bulk pre-fetch-and-store URLs into the dynamic partition.
  CacheUrls { urls: Vec<String> },
  /// Ask for entry counts per partition.
  GetCacheInfo,
}

/// Replies sent back on the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandReply {
  Ack,
  /// Partition name -> entry count
  CacheInfo(BTreeMap<String, usize>),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_wire_format_matches_page_messages() {
    let cmd: Command = serde_json::from_str(
      r#"{"type":"CLEAR_CACHE","payload":{"cache_name":"static-v2.0.0"}}"#,
    )
    .unwrap();
    assert_eq!(
      cmd,
      Command::ClearCache {
        cache_name: Some("static-v2.0.0".to_string())
      }
    );

    let cmd: Command = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
    assert_eq!(cmd, Command::SkipWaiting);

    let cmd: Command =
      serde_json::from_str(r#"{"type":"CACHE_URLS","payload":{"urls":["/a.js"]}}"#).unwrap();
    assert_eq!(
      cmd,
      Command::CacheUrls {
        urls: vec!["/a.js".to_string()]
      }
    );
  }

  #[test]
  fn test_reply_round_trip() {
    let mut info = BTreeMap::new();
    info.insert("api-v2.0.0".to_string(), 3usize);

    let reply = CommandReply::CacheInfo(info);
    let json = serde_json::to_string(&reply).unwrap();
    let back: CommandReply = serde_json::from_str(&json).unwrap();

    assert_eq!(reply, back);
  }
}
