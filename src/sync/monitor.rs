//! Connectivity polling that drains the queue when the server comes back.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::SyncEngine;
use crate::network::{HttpRequest, HttpTransport, OnlineFlag};

/// Whether the server answers at `probe_path`. Any response counts, even an
/// error status; only connectivity failures mean offline.
pub async fn check_connectivity<T: HttpTransport>(transport: &T, probe_path: &str) -> bool {
  match transport.send(&HttpRequest::get(probe_path)).await {
    Ok(_) => true,
    Err(e) if e.is_connectivity() => {
      debug!(error = %e, "Connectivity probe failed");
      false
    }
    Err(e) => {
      warn!(error = %e, "Connectivity probe error");
      true
    }
  }
}

/// Poll connectivity every `interval`, keep `flag` current, and run
/// `sync_all` when connectivity is restored. While online with actions still
/// queued each tick also drains, so backed-off actions get picked up.
pub fn spawn_connectivity_monitor<T: HttpTransport>(
  engine: SyncEngine<T>,
  transport: Arc<T>,
  flag: OnlineFlag,
  probe_path: String,
  interval: Duration,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    info!(
      interval_secs = interval.as_secs(),
      probe_path = %probe_path,
      "Starting connectivity monitor"
    );

    let mut ticker = tokio::time::interval(interval);
    loop {
      ticker.tick().await;

      let online = check_connectivity(transport.as_ref(), &probe_path).await;
      let restored = flag.set_online(online);
      if !online {
        continue;
      }

      if restored {
        info!("Connectivity restored, syncing offline queue");
      } else {
        match engine.store().count_actions() {
          Ok(0) => continue,
          Ok(pending) => debug!(pending, "Draining offline queue"),
          Err(e) => {
            warn!(error = %e, "Failed to count queued actions");
            continue;
          }
        }
      }

      if let Err(e) = engine.sync_all().await {
        warn!(error = %e, "Offline queue sync failed");
      }
    }
  })
}
