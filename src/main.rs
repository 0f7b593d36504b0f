mod cache;
mod commands;
mod config;
mod db;
mod fetch;
mod manager;
mod records;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use cache::SqliteCacheStore;
use commands::{Command, CommandReply};
use config::Config;
use db::OfflineStore;
use fetch::HttpFetcher;
use manager::CacheManager;
use sync::{SyncCoordinator, SyncTag};

#[derive(Parser, Debug)]
#[command(name = "notesync")]
#[command(about = "Offline cache and sync engine for the AI notebook app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/notesync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
  /// Pre-warm the static partition with the shell manifest
  Install,
  /// Garbage-collect cache partitions from older versions
  Activate,
  /// Show entry counts per cache partition
  Info,
  /// Clear one partition, or all partitions
  Clear {
    /// Partition name; clears everything when omitted
    #[arg(long)]
    cache: Option<String>,
  },
  /// Fetch-and-store URLs into the dynamic partition
  Warm { urls: Vec<String> },
  /// Drain the pending sync queue against the upstream API
  Sync {
    /// Sync a single tag (sync-notes, sync-todos); all tags when omitted
    #[arg(long)]
    tag: Option<String>,
  },
  /// Sweep expired cache metadata from the offline database
  Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
    .init();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let store = match &config.cache.cache_db {
    Some(path) => Arc::new(SqliteCacheStore::open_at(path)?),
    None => Arc::new(SqliteCacheStore::open()?),
  };
  let fetcher = Arc::new(HttpFetcher::new(&config.upstream.url)?);
  let manager = CacheManager::new(
    config.cache_config(),
    cache::RouteTable::default(),
    Arc::clone(&store),
    Arc::clone(&fetcher),
  );

  match args.command {
    CliCommand::Install => {
      manager.on_install().await?;
      println!("Installed: static partition pre-warmed");
    }
    CliCommand::Activate => {
      manager.on_activate().await?;
      println!("Activated: old partitions removed");
    }
    CliCommand::Info => {
      match manager.on_message(Command::GetCacheInfo).await? {
        CommandReply::CacheInfo(info) => {
          if info.is_empty() {
            println!("Cache is empty");
          }
          for (partition, count) in info {
            println!("{:<24} {} entries", partition, count);
          }
        }
        CommandReply::Ack => {}
      }
    }
    CliCommand::Clear { cache } => {
      manager
        .on_message(Command::ClearCache { cache_name: cache })
        .await?;
      println!("Cache cleared");
    }
    CliCommand::Warm { urls } => {
      let count = urls.len();
      manager.on_message(Command::CacheUrls { urls }).await?;
      println!("Cached {} URLs", count);
    }
    CliCommand::Sync { tag } => {
      let offline = open_offline_store(&config)?;
      let coordinator = SyncCoordinator::new(Arc::new(offline), fetcher);

      let stats = match tag {
        Some(raw) => {
          let tag = SyncTag::parse(&raw)
            .ok_or_else(|| color_eyre::eyre::eyre!("Unknown sync tag: {}", raw))?;
          coordinator.drain(tag).await?
        }
        None => coordinator.on_online().await,
      };

      println!(
        "Sync done: {} replayed, {} failed, {} dropped",
        stats.replayed, stats.failed, stats.dropped
      );
    }
    CliCommand::Cleanup => {
      let offline = open_offline_store(&config)?;
      let deleted = offline.cleanup_expired_cache()?;
      println!("Removed {} expired metadata entries", deleted);
    }
  }

  Ok(())
}

fn open_offline_store(config: &Config) -> Result<OfflineStore> {
  match &config.cache.offline_db {
    Some(path) => OfflineStore::open_at(path),
    None => OfflineStore::open(),
  }
}
