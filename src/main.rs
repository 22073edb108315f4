mod assets;
mod cache;
mod config;
mod directory;
mod event;
mod fetch;
mod locks;
mod mutation;
mod network;
mod replay;
mod router;
mod server;
mod state;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache::{EntityId, EntityStorage, SqliteStorage};
use config::Config;
use directory::{queries, Restaurant, Review};
use event::ClientMessage;
use network::HttpNetwork;
use worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "restview")]
#[command(about = "Offline-first caching worker for the restaurant reviews directory")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./restview.yaml, then $XDG_CONFIG_HOME/restview/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install, activate, and intercept requests (default)
  Serve,
  /// Precache the page shell for the configured version
  Install,
  /// Purge asset caches of other versions
  Activate,
  /// Replay queued writes now
  Flush,
  /// Show what is stored locally
  Status,
  /// List stored restaurants
  Restaurants {
    #[arg(long, default_value = queries::ALL)]
    cuisine: String,
    #[arg(long, default_value = queries::ALL)]
    neighborhood: String,
    /// Only favorites
    #[arg(long)]
    favorites: bool,
  },
  /// List the cuisines and neighborhoods available for filtering
  Filters,
  /// List stored reviews of a restaurant
  Reviews { restaurant_id: String },
  /// Wipe the local store, the queue and all asset caches
  Reset,
}

fn init_logging(config: &Config) -> Result<WorkerGuard> {
  let log_dir = config.data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (file_writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "restview.log"));

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("restview=info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .with(
      tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

fn open_worker(config: &Config) -> Result<Worker<HttpNetwork>> {
  let storage = SqliteStorage::open_at(&config.database_path()?)?;
  Worker::new(config.clone(), HttpNetwork::new(&config.assets.origin)?, storage)
}

async fn serve(config: Config) -> Result<()> {
  let worker = Arc::new(open_worker(&config)?);
  let (handle, events) = event::channel();
  let running = tokio::spawn(worker.run(events));

  // A failed install keeps the previous version's caches in service
  match handle.install().await {
    Ok(_) => {
      handle.activate().await?;
    }
    Err(e) => warn!(error = %e, "install failed, not activating"),
  }

  server::serve(config.server.listen, handle, config.assets.origin.clone()).await?;

  running
    .await
    .map_err(|e| eyre!("Worker task failed: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_logging(&config)?;

  match args.command.unwrap_or(Command::Serve) {
    Command::Serve => serve(config).await?,
    Command::Install => {
      let count = open_worker(&config)?.install().await?;
      println!("precached {} assets into {}", count, config.static_cache_name());
    }
    Command::Activate => {
      let purged = open_worker(&config)?.activate()?;
      if purged.is_empty() {
        println!("nothing to purge");
      }
      for namespace in purged {
        println!("purged {}", namespace);
      }
    }
    Command::Flush => {
      let report = open_worker(&config)?
        .handle_message(ClientMessage::FlushPending)
        .await?;
      println!(
        "replayed {}, {} still pending",
        report.replayed, report.remaining
      );
      if let Some(queue_id) = report.stopped_at {
        println!("stopped at queue entry {}", queue_id);
      }
    }
    Command::Status => {
      let status = open_worker(&config)?.status()?;
      println!(
        "restaurants: {} stored (hydrated: {})",
        status.restaurants, status.restaurants_hydrated
      );
      println!(
        "reviews:     {} stored (hydrated: {})",
        status.reviews, status.reviews_hydrated
      );
      println!("caches:      {}", status.namespaces.join(", "));
      println!("pending:     {}", status.pending.len());
      for entry in &status.pending {
        let id = entry
          .operation
          .entity_id()
          .map(|id| id.to_string())
          .unwrap_or_default();
        println!("  #{} {} /{} {}", entry.queue_id, entry.method(), entry.path(), id);
      }
    }
    Command::Restaurants {
      cuisine,
      neighborhood,
      favorites,
    } => {
      let storage = SqliteStorage::open_at(&config.database_path()?)?;
      let restaurants: Vec<Restaurant> = storage.load()?;
      let matching = queries::by_cuisine_and_neighborhood(&restaurants, &cuisine, &neighborhood);
      let favorite_ids: Vec<String> = queries::favorites(&restaurants)
        .iter()
        .map(|r| r.id.to_string())
        .collect();

      for r in matching {
        let is_favorite = favorite_ids.contains(&r.id.to_string());
        if favorites && !is_favorite {
          continue;
        }
        println!(
          "{:>4} {}{} ({}, {}) {} {}",
          r.id,
          if is_favorite { "* " } else { "" },
          r.name,
          r.cuisine_type,
          r.neighborhood,
          queries::url_for_restaurant(r),
          queries::image_url_for_restaurant(r),
        );
      }
    }
    Command::Filters => {
      let storage = SqliteStorage::open_at(&config.database_path()?)?;
      let restaurants: Vec<Restaurant> = storage.load()?;
      println!("cuisines:      {}", queries::cuisines(&restaurants).join(", "));
      println!("neighborhoods: {}", queries::neighborhoods(&restaurants).join(", "));
    }
    Command::Reviews { restaurant_id } => {
      let id = EntityId::parse(&restaurant_id)
        .ok_or_else(|| eyre!("Invalid restaurant id '{}'", restaurant_id))?;
      let storage = SqliteStorage::open_at(&config.database_path()?)?;
      let restaurants: Vec<Restaurant> = storage.load()?;
      let reviews: Vec<Review> = storage.load()?;

      if let Some(r) = queries::by_id(&restaurants, &id) {
        println!("{}", r.name);
      }
      for review in queries::reviews_for_restaurant(&reviews, &id) {
        println!("  [{}] {}: {}", review.rating, review.name, review.comments);
      }
    }
    Command::Reset => {
      open_worker(&config)?.reset()?;
      info!("local state cleared");
    }
  }

  Ok(())
}
