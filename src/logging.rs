use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Error, Result};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "OFFSYNC_LOG";

const DEFAULT_FILTER: &str = "offsync=info";

/// Where log output goes.
#[derive(Debug, Clone)]
pub enum LogTarget {
  Stderr,
  /// Daily-rotated files in this directory.
  Directory(PathBuf),
}

/// Default log directory under the user data directory.
pub fn default_log_dir() -> Option<PathBuf> {
  dirs::data_dir().map(|p| p.join("offsync").join("logs"))
}

fn env_filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Keep the returned guard alive until exit
/// so buffered lines get flushed.
pub fn init(target: &LogTarget) -> Result<Option<WorkerGuard>> {
  match target {
    LogTarget::Stderr => {
      tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to install logger: {}", e)))?;
      Ok(None)
    }
    LogTarget::Directory(dir) => {
      let (writer, guard) = file_writer(dir)?;
      tracing_subscriber::registry()
        .with(env_filter())
        .with(
          tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to install logger: {}", e)))?;
      Ok(Some(guard))
    }
  }
}

fn file_writer(dir: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
  std::fs::create_dir_all(dir).map_err(|e| {
    Error::Config(format!("Failed to create log directory {}: {}", dir.display(), e))
  })?;
  let appender = tracing_appender::rolling::daily(dir, "offsync.log");
  Ok(tracing_appender::non_blocking(appender))
}
