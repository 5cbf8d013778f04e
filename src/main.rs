use chrono::NaiveDate;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use orderdeck::aggregator::{CancellationFlag, Outcome};
use orderdeck::auth::EnvTokenProvider;
use orderdeck::cache::{CacheStore, MemoryStore, PersistentStore, SqliteStore};
use orderdeck::config::Config;
use orderdeck::event::{ProgressEvent, ProgressEvents};
use orderdeck::orders::{DataSource, OrderQuery, OrdersService};
use orderdeck::request::{RequestCoordinator, ReqwestTransport};

#[derive(Parser, Debug)]
#[command(name = "orderdeck")]
#[command(about = "Fetch, aggregate and cache orders from the order API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/orderdeck/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// First order date (YYYY-MM-DD), defaults to yesterday
  #[arg(long)]
  from: Option<NaiveDate>,

  /// Last order date (YYYY-MM-DD), defaults to today
  #[arg(long)]
  to: Option<NaiveDate>,

  /// Only orders with this status
  #[arg(short, long)]
  status: Option<String>,

  /// Only orders from this channel
  #[arg(long)]
  channel: Option<String>,

  /// Skip the cache lookup and fetch from the API; a complete result is still cached
  #[arg(long)]
  no_cache: bool,

  /// Drop all cached orders before fetching
  #[arg(long)]
  invalidate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let (writer, _guard) = tracing_appender::non_blocking(std::io::stderr());
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(writer)
    .init();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let storage: Arc<dyn PersistentStore> = if config.cache.persist {
    let store = match &config.cache.path {
      Some(path) => SqliteStore::open(path)?,
      None => SqliteStore::open_default()?,
    };
    match config.cache.quota_bytes {
      Some(quota) => Arc::new(store.with_quota(quota)),
      None => Arc::new(store),
    }
  } else {
    Arc::new(MemoryStore::new())
  };

  let cache = CacheStore::with_shared_storage(storage, config.cache.options());
  let coordinator = RequestCoordinator::new(
    ReqwestTransport::new(),
    config.requests.coordinator_options(),
  );
  let service = OrdersService::new(
    config.api.base_url.clone(),
    cache,
    coordinator,
    Arc::new(EnvTokenProvider::new()),
    config.pagination.options(),
    config.requests.breaker_policy(),
  );

  if args.invalidate {
    service.invalidate_orders();
  }

  let mut query = OrderQuery::last_day();
  if args.from.is_some() {
    query.date_from = args.from;
  }
  if args.to.is_some() {
    query.date_to = args.to;
  }
  query.status = args.status;
  query.channel = args.channel;

  let cancel = CancellationFlag::new();
  let ctrl_c = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      eprintln!("\nCancelling after the current page...");
      ctrl_c.cancel();
    }
  });

  let (sink, mut events) = ProgressEvents::channel();
  let printer = tokio::spawn(async move {
    while let Some(event) = events.next().await {
      match event {
        ProgressEvent::Progress(progress) => {
          let eta = progress
            .eta()
            .map(|eta| format!(", eta {}s", eta.as_secs()))
            .unwrap_or_default();
          eprintln!(
            "page {} ({:.0}%): {} orders{}",
            progress.current_page,
            progress.completion_percent(),
            progress.items_fetched,
            eta
          );
        }
        ProgressEvent::Finished(summary) => {
          eprintln!("{} in {:.1}s", summary.describe(), summary.elapsed.as_secs_f64());
          for error in &summary.errors {
            eprintln!("  page {}: {}", error.page, error.message);
          }
        }
      }
    }
  });

  let result = if args.no_cache {
    service.refresh_orders(&query, &sink, &cancel).await
  } else {
    service.fetch_orders(&query, &sink, &cancel).await
  };
  drop(sink);
  if let Err(e) = printer.await {
    tracing::warn!(error = %e, "Progress printer failed");
  }
  service.shutdown();

  let result = result.map_err(|e| eyre!("Failed to fetch orders: {}", e))?;
  if result.source == DataSource::Cache {
    eprintln!("{} orders (cached)", result.orders.len());
  }

  println!("{}", serde_json::to_string_pretty(&result.orders)?);

  match result.summary.map(|s| s.outcome) {
    Some(Outcome::Failed) => Err(eyre!("No orders could be fetched")),
    _ => Ok(()),
  }
}
