use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::manager::CacheConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub upstream: UpstreamConfig,
  #[serde(default)]
  pub cache: CacheSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
  /// Base URL of the backend API ("https://app.example.com")
  pub url: String,
  /// Page origin for same-origin interception; defaults to the upstream URL
  pub origin: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheSettings {
  /// Deploy version embedded in partition names
  pub version: Option<String>,
  /// Shell assets pre-warmed on install
  pub precache: Option<Vec<String>>,
  /// Offline fallback page path
  pub offline_page: Option<String>,
  /// Response cache database location (default: data dir)
  pub cache_db: Option<PathBuf>,
  /// Offline record database location (default: data dir)
  pub offline_db: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./notesync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/notesync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/notesync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("notesync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("notesync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the API bearer token from the environment.
  pub fn get_api_token() -> Result<String> {
    std::env::var("NOTESYNC_TOKEN")
      .map_err(|_| eyre!("API token not found. Set the NOTESYNC_TOKEN environment variable."))
  }

  /// Build the cache manager configuration, filling defaults.
  pub fn cache_config(&self) -> CacheConfig {
    let defaults = CacheConfig::default();

    CacheConfig {
      version: self.cache.version.clone().unwrap_or(defaults.version),
      origin: self
        .upstream
        .origin
        .clone()
        .or_else(|| Some(self.upstream.url.clone())),
      precache: self.cache.precache.clone().unwrap_or(defaults.precache),
      offline_page: self
        .cache
        .offline_page
        .clone()
        .unwrap_or(defaults.offline_page),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_fills_defaults() {
    let config: Config = serde_yaml::from_str(
      r#"
upstream:
  url: https://app.example.com
"#,
    )
    .unwrap();

    let cache = config.cache_config();
    assert_eq!(cache.version, "2.0.0");
    assert_eq!(cache.origin.as_deref(), Some("https://app.example.com"));
    assert_eq!(cache.offline_page, "/offline.html");
    assert_eq!(cache.precache.len(), 5);
  }

  #[test]
  fn test_overrides_are_respected() {
    let config: Config = serde_yaml::from_str(
      r#"
upstream:
  url: https://api.example.com
  origin: https://app.example.com
cache:
  version: 3.1.0
  offline_page: /fallback.html
  precache:
    - /
    - /fallback.html
"#,
    )
    .unwrap();

    let cache = config.cache_config();
    assert_eq!(cache.version, "3.1.0");
    assert_eq!(cache.origin.as_deref(), Some("https://app.example.com"));
    assert_eq!(cache.offline_page, "/fallback.html");
    assert_eq!(cache.precache, vec!["/", "/fallback.html"]);
  }
}
