use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use offsync::cache::spawn_sweep_task;
use offsync::config::Config;
use offsync::logging::{self, LogTarget};
use offsync::network::{ApiClient, HttpMethod, OnlineFlag, RouteTable};
use offsync::sync::{self, NoBackgroundSync};
use offsync::{CacheManager, RequestInterceptor, Store, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "offsync")]
#[command(about = "Offline cache and mutation queue for an HTTP API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the rotating log file
  #[arg(long)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Send a request, queueing mutations if the server is unreachable
  Send {
    /// GET, POST, PUT, PATCH or DELETE
    method: HttpMethod,
    path: String,
    /// JSON request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Fetch a path, caching the result, or read it from the cache when offline
  Get {
    path: String,
    /// Collection the response is cached in
    #[arg(short = 'C', long)]
    collection: String,
    /// Fetch a single record with this id
    #[arg(long)]
    id: Option<String>,
    /// Only cached records owned by this parent id (offline fallback)
    #[arg(long)]
    parent: Option<String>,
  },
  /// List queued actions
  Queue {
    /// Only actions for this entity type
    #[arg(short, long)]
    entity: Option<String>,
  },
  /// Replay the offline queue once
  Sync,
  /// Remove expired cache entries
  Sweep,
  /// Clear a cached collection, or the offline queue
  Clear {
    collection: Option<String>,
    #[arg(long, conflicts_with = "collection")]
    queue: bool,
  },
  /// Run the cache sweeper and connectivity monitor until Ctrl+C
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let target = if args.log_stderr {
    LogTarget::Stderr
  } else {
    logging::default_log_dir()
      .map(LogTarget::Directory)
      .unwrap_or(LogTarget::Stderr)
  };
  let _guard = logging::init(&target)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let store = Arc::new(Store::open(
    &config.store.resolve_path()?,
    &config.cache.collections,
  )?);
  let cache = CacheManager::new(store.clone()).with_ttl(config.cache.ttl());
  let client = Arc::new(ApiClient::new(&config.api)?);
  let online = OnlineFlag::default();
  let interceptor = RequestInterceptor::new(
    client.clone(),
    store.clone(),
    Arc::new(online.clone()),
    RouteTable::new(&config.routes),
  );

  match args.command {
    Command::Send { method, path, data } => {
      let body = data
        .map(|d| serde_json::from_str::<Value>(&d))
        .transpose()
        .map_err(|e| eyre!("Invalid JSON body: {}", e))?;

      let response = interceptor.send(method, &path, body).await?;
      println!("{}", response.status);
      print_json(&response.body)?;
    }

    Command::Get {
      path,
      collection,
      id,
      parent,
    } => match interceptor.get(&path).await {
      Ok(response) => {
        let cached = cache_response(&cache, &collection, id.as_deref(), &response.body);
        info!(path = %path, collection = %collection, cached, "Fetched from network");
        print_json(&response.body)?;
      }
      Err(e) if e.is_connectivity() => {
        let value = match (&id, &parent) {
          (Some(id), _) => cache.get_raw(&collection, id),
          (None, Some(parent)) => Some(Value::Array(cache.get_by_parent_raw(&collection, parent))),
          (None, None) => Some(Value::Array(cache.get_all_raw(&collection))),
        };
        match value {
          Some(value) => {
            eprintln!("offline: serving cached {}", collection);
            print_json(&value)?;
          }
          None => return Err(e.into()),
        }
      }
      Err(e) => return Err(e.into()),
    },

    Command::Queue { entity } => {
      let actions = match entity {
        Some(entity) => store.list_actions_for(&entity)?,
        None => store.list_actions()?,
      };
      for action in &actions {
        println!("{}", serde_json::to_string(action)?);
      }
    }

    Command::Sync => {
      let engine = SyncEngine::new(client.clone(), store.clone())
        .with_policy(config.sync.retry_policy())
        .with_background_retries(false);
      let report = engine.sync_all().await?;
      println!(
        "attempted {} succeeded {} retrying {} dropped {} waiting {}",
        report.attempted, report.succeeded, report.retrying, report.dropped, report.skipped
      );
    }

    Command::Sweep => {
      let removed = cache.sweep_expired();
      println!("removed {}", removed);
    }

    Command::Clear { collection, queue } => {
      if queue {
        println!("removed {}", store.clear_actions()?);
      } else if let Some(collection) = collection {
        store.check_collection(&collection)?;
        println!("removed {}", cache.clear_raw(&collection));
      } else {
        return Err(eyre!("Name a collection or pass --queue"));
      }
    }

    Command::Watch => {
      let engine = SyncEngine::new(client.clone(), store.clone())
        .with_policy(config.sync.retry_policy())
        .with_background_retries(config.sync.background_retries);
      engine.register_background_sync(&NoBackgroundSync);

      let sweeper = spawn_sweep_task(cache.clone(), config.cache.sweep_interval());
      let monitor = sync::spawn_connectivity_monitor(
        engine.clone(),
        client.clone(),
        online.clone(),
        config.sync.probe_path.clone(),
        config.sync.probe_interval(),
      );

      tokio::signal::ctrl_c().await?;
      info!("Shutting down");
      monitor.abort();
      sweeper.abort();
      engine.shutdown();
    }
  }

  Ok(())
}

/// Cache a fetched body: a single record under `id`, or every object in an
/// array that carries an `id` field. Returns how many records were written.
fn cache_response(cache: &CacheManager, collection: &str, id: Option<&str>, body: &Value) -> usize {
  match (id, body) {
    (Some(id), Value::Object(_)) => {
      usize::from(cache.put_raw(collection, id, parent_of(body).as_deref(), body))
    }
    (None, Value::Array(items)) => {
      let mut written = 0;
      for item in items {
        let Some(id) = id_of(item) else { continue };
        if cache.put_raw(collection, &id, parent_of(item).as_deref(), item) {
          written += 1;
        }
      }
      written
    }
    _ => 0,
  }
}

fn id_of(value: &Value) -> Option<String> {
  scalar_id(value.get("id")?)
}

/// Parent id from the conventional `parentId` or `projectId` fields.
fn parent_of(value: &Value) -> Option<String> {
  ["parentId", "projectId"]
    .iter()
    .find_map(|key| scalar_id(value.get(*key)?))
}

fn scalar_id(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
