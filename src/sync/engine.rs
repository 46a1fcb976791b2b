//! Replay of queued actions with bounded retry and backoff.

use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::policy::RetryPolicy;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::network::HttpTransport;
use crate::queue::QueuedAction;
use crate::store::Store;

/// Tag used when registering with a platform background-sync facility.
pub const BACKGROUND_SYNC_TAG: &str = "offline-sync";

/// What happened to one action during a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
  /// Server accepted it; removed from the queue.
  Succeeded,
  /// Failed; retry count persisted and another attempt due after `delay`.
  Retrying { retries: u32, delay: Duration },
  /// Out of retries; removed from the queue.
  Dropped,
  /// Not attempted: already in flight elsewhere or no longer queued.
  Skipped,
}

/// Aggregate result of a `sync_all` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub attempted: usize,
  pub succeeded: usize,
  pub retrying: usize,
  pub dropped: usize,
  /// Actions left alone: backoff not elapsed, or already in flight.
  pub skipped: usize,
  /// Another drain was running; it will make a follow-up pass.
  pub deferred: bool,
}

impl SyncReport {
  pub fn deferred() -> Self {
    Self {
      deferred: true,
      ..Self::default()
    }
  }

  fn record(&mut self, outcome: ActionOutcome) {
    match outcome {
      ActionOutcome::Succeeded => self.succeeded += 1,
      ActionOutcome::Retrying { .. } => self.retrying += 1,
      ActionOutcome::Dropped => self.dropped += 1,
      ActionOutcome::Skipped => {
        self.skipped += 1;
        return;
      }
    }
    self.attempted += 1;
  }

  fn merge(&mut self, other: SyncReport) {
    self.attempted += other.attempted;
    self.succeeded += other.succeeded;
    self.retrying += other.retrying;
    self.dropped += other.dropped;
    self.skipped += other.skipped;
  }

  pub fn failed(&self) -> usize {
    self.retrying + self.dropped
  }
}

/// Platform facility that can wake the process to sync in the background.
pub trait BackgroundSyncHook {
  fn register(&self, tag: &str) -> std::result::Result<(), String>;
}

/// Hook for platforms without background sync.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBackgroundSync;

impl BackgroundSyncHook for NoBackgroundSync {
  fn register(&self, _tag: &str) -> std::result::Result<(), String> {
    Err("background sync is not supported on this platform".to_string())
  }
}

struct Inner<T: HttpTransport> {
  transport: Arc<T>,
  store: Arc<Store>,
  clock: Arc<dyn Clock>,
  policy: RetryPolicy,
  background_retries: bool,
  draining: AtomicBool,
  rerun: AtomicBool,
  in_flight: Mutex<HashSet<String>>,
  timers: Mutex<HashMap<String, Timer>>,
  next_timer: AtomicU64,
}

/// A scheduled retry. The generation tells a firing timer apart from one
/// that replaced it.
struct Timer {
  generation: u64,
  handle: JoinHandle<()>,
}

/// Drains the offline queue against the network.
///
/// Replays bypass the request interceptor so a failing action is never
/// re-queued. Retry timers live in memory only; after a restart the next
/// `sync_all` picks the durable actions up again.
pub struct SyncEngine<T: HttpTransport> {
  inner: Arc<Inner<T>>,
}

impl<T: HttpTransport> Clone for SyncEngine<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

/// Marks an action as being replayed for as long as it lives.
struct InFlight<'a> {
  set: &'a Mutex<HashSet<String>>,
  id: String,
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
    set.remove(&self.id);
  }
}

/// Holds the drain flag; released on drop, including when a `sync_all`
/// future is cancelled mid-drain.
struct Draining<'a> {
  flag: &'a AtomicBool,
}

impl Drop for Draining<'_> {
  fn drop(&mut self) {
    self.flag.store(false, Ordering::SeqCst);
  }
}

impl<T: HttpTransport> SyncEngine<T> {
  pub fn new(transport: Arc<T>, store: Arc<Store>) -> Self {
    Self::build(transport, store, Arc::new(SystemClock), RetryPolicy::default(), true)
  }

  fn build(
    transport: Arc<T>,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    background_retries: bool,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        transport,
        store,
        clock,
        policy,
        background_retries,
        draining: AtomicBool::new(false),
        rerun: AtomicBool::new(false),
        in_flight: Mutex::new(HashSet::new()),
        timers: Mutex::new(HashMap::new()),
        next_timer: AtomicU64::new(0),
      }),
    }
  }

  fn rebuild(self, f: impl FnOnce(&mut Arc<dyn Clock>, &mut RetryPolicy, &mut bool)) -> Self {
    let inner = &self.inner;
    let mut clock = Arc::clone(&inner.clock);
    let mut policy = inner.policy;
    let mut background = inner.background_retries;
    f(&mut clock, &mut policy, &mut background);
    Self::build(
      Arc::clone(&inner.transport),
      Arc::clone(&inner.store),
      clock,
      policy,
      background,
    )
  }

  pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
    self.rebuild(|c, _, _| *c = clock)
  }

  pub fn with_policy(self, policy: RetryPolicy) -> Self {
    self.rebuild(|_, p, _| *p = policy)
  }

  /// Whether failed actions get an in-memory retry timer. Without it they
  /// wait for the next `sync_all` after their backoff.
  pub fn with_background_retries(self, enabled: bool) -> Self {
    self.rebuild(|_, _, b| *b = enabled)
  }

  pub fn policy(&self) -> RetryPolicy {
    self.inner.policy
  }

  pub fn store(&self) -> &Arc<Store> {
    &self.inner.store
  }

  pub fn is_draining(&self) -> bool {
    self.inner.draining.load(Ordering::SeqCst)
  }

  /// Number of retry timers currently scheduled.
  pub fn scheduled_retries(&self) -> usize {
    self.lock_timers().len()
  }

  /// Register with the platform's background-sync facility. Failure is
  /// normal on platforms without one and is only logged.
  pub fn register_background_sync(&self, hook: &dyn BackgroundSyncHook) -> bool {
    match hook.register(BACKGROUND_SYNC_TAG) {
      Ok(()) => {
        info!(tag = BACKGROUND_SYNC_TAG, "Registered background sync");
        true
      }
      Err(reason) => {
        debug!(%reason, "Background sync unavailable");
        false
      }
    }
  }

  /// Replay every eligible queued action concurrently and wait for all of
  /// them to settle.
  ///
  /// A call made while another drain is running returns a deferred report
  /// at once; the running drain then makes one more pass.
  pub async fn sync_all(&self) -> Result<SyncReport> {
    let inner = &self.inner;
    if inner.draining.swap(true, Ordering::SeqCst) {
      inner.rerun.store(true, Ordering::SeqCst);
      debug!("Sync already running, follow-up pass requested");
      return Ok(SyncReport::deferred());
    }

    let mut held = Some(Draining {
      flag: &inner.draining,
    });
    let mut report = SyncReport::default();
    while held.is_some() {
      inner.rerun.store(false, Ordering::SeqCst);
      report.merge(self.drain_once().await?);

      if inner.rerun.load(Ordering::SeqCst) {
        continue;
      }
      held = None;
      // A trigger can land between the check above and the release
      if inner.rerun.load(Ordering::SeqCst) && !inner.draining.swap(true, Ordering::SeqCst) {
        held = Some(Draining {
          flag: &inner.draining,
        });
      }
    }

    if report.attempted > 0 {
      info!(
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failed(),
        dropped = report.dropped,
        "Offline queue sync finished"
      );
    }
    Ok(report)
  }

  async fn drain_once(&self) -> Result<SyncReport> {
    let actions = self.inner.store.list_actions()?;
    let now = self.inner.clock.now_ms();

    let mut report = SyncReport::default();
    let (ready, waiting): (Vec<_>, Vec<_>) =
      actions.into_iter().partition(|a| a.is_eligible(now));
    report.skipped += waiting.len();

    if ready.is_empty() {
      return Ok(report);
    }
    debug!(ready = ready.len(), waiting = waiting.len(), "Replaying queued actions");

    // Futures are polled in list order, so requests go out oldest first
    let outcomes = join_all(ready.iter().map(|action| self.sync_action(action))).await;
    for outcome in outcomes {
      report.record(outcome);
    }
    Ok(report)
  }

  /// Replay one action and apply the retry policy to the result.
  ///
  /// The retry count is taken from the store, not from `action`, so a stale
  /// copy can never replay past the bound.
  pub async fn sync_action(&self, action: &QueuedAction) -> ActionOutcome {
    let Some(_claim) = self.claim(&action.id) else {
      debug!(id = %action.id, "Action already in flight");
      return ActionOutcome::Skipped;
    };

    let action = match self.inner.store.get_action(&action.id) {
      Ok(Some(current)) => current,
      Ok(None) => {
        debug!(id = %action.id, "Queued action already gone");
        return ActionOutcome::Skipped;
      }
      Err(e) => {
        warn!(id = %action.id, error = %e, "Failed to load queued action");
        return ActionOutcome::Skipped;
      }
    };

    if self.inner.policy.is_exhausted(action.retries) {
      self.remove(&action.id);
      warn!(
        id = %action.id,
        retries = action.retries,
        "Dropping queued action that already exhausted its retries"
      );
      return ActionOutcome::Dropped;
    }

    self.attempt(&action).await
  }

  /// Replay a queued action by id, ignoring its backoff window. A pending
  /// retry timer for it is cancelled.
  pub async fn retry_now(&self, id: &str) -> ActionOutcome {
    if let Some(timer) = self.lock_timers().remove(id) {
      timer.handle.abort();
    }
    self.replay_by_id(id).await
  }

  /// Runs inside the timer task, so the handle is only forgotten, never
  /// aborted. A timer that has since been replaced does nothing.
  async fn fire_timer(&self, id: &str, generation: u64) {
    {
      let mut timers = self.lock_timers();
      match timers.get(id) {
        Some(timer) if timer.generation == generation => {
          timers.remove(id);
        }
        _ => return,
      }
    }
    self.replay_by_id(id).await;
  }

  async fn replay_by_id(&self, id: &str) -> ActionOutcome {
    match self.inner.store.get_action(id) {
      Ok(Some(action)) => self.sync_action(&action).await,
      Ok(None) => ActionOutcome::Skipped,
      Err(e) => {
        warn!(id, error = %e, "Failed to load queued action");
        ActionOutcome::Skipped
      }
    }
  }

  async fn attempt(&self, action: &QueuedAction) -> ActionOutcome {
    let inner = &self.inner;
    debug!(
      id = %action.id,
      method = %action.method.as_http(),
      endpoint = %action.endpoint,
      retries = action.retries,
      "Replaying queued action"
    );

    let failure = match inner.transport.send(&action.to_request()).await {
      Ok(response) if response.is_success() => {
        self.remove(&action.id);
        debug!(id = %action.id, status = response.status, "Queued action synced");
        return ActionOutcome::Succeeded;
      }
      Ok(response) => format!("HTTP {}", response.status),
      Err(e) => e.to_string(),
    };

    let retries = action.retries + 1;
    let delay = inner.policy.delay(retries);
    let next_attempt_at = inner.clock.now_ms() + delay.as_millis() as i64;

    // Persist first so a crash before removal still never replays it again
    match inner
      .store
      .update_action_retry(&action.id, retries, Some(next_attempt_at))
    {
      Ok(true) => {}
      Ok(false) => {
        debug!(id = %action.id, "Queued action removed during replay");
        return ActionOutcome::Skipped;
      }
      Err(e) if inner.policy.is_exhausted(retries) => {
        warn!(id = %action.id, error = %e, "Failed to persist final retry count");
      }
      Err(e) => {
        // Count not persisted: no timer, the next drain retries it
        warn!(id = %action.id, error = %e, "Failed to persist retry count, not rescheduling");
        return ActionOutcome::Skipped;
      }
    }

    if inner.policy.is_exhausted(retries) {
      self.remove(&action.id);
      warn!(
        id = %action.id,
        endpoint = %action.endpoint,
        retries,
        error = %failure,
        "Dropping queued action after max retries"
      );
      return ActionOutcome::Dropped;
    }

    debug!(
      id = %action.id,
      retries,
      delay_ms = delay.as_millis() as u64,
      error = %failure,
      "Queued action failed, will retry"
    );
    if inner.background_retries {
      self.schedule_retry(action.id.clone(), delay);
    }
    ActionOutcome::Retrying { retries, delay }
  }

  fn schedule_retry(&self, id: String, delay: Duration) {
    let generation = self.inner.next_timer.fetch_add(1, Ordering::SeqCst);
    let engine = self.clone();
    let key = id.clone();

    // Hold the map lock across the spawn so the timer can't fire before its
    // entry exists
    let mut timers = self.lock_timers();
    let handle = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      engine.fire_timer(&id, generation).await;
    });
    if let Some(previous) = timers.insert(key, Timer { generation, handle }) {
      previous.handle.abort();
    }
  }

  /// Cancel every scheduled retry. Queued actions stay in the store.
  pub fn shutdown(&self) -> usize {
    let mut timers = self.lock_timers();
    let count = timers.len();
    for (_, timer) in timers.drain() {
      timer.handle.abort();
    }
    if count > 0 {
      info!(cancelled = count, "Cancelled scheduled retries");
    }
    count
  }

  fn claim(&self, id: &str) -> Option<InFlight<'_>> {
    let mut set = self
      .inner
      .in_flight
      .lock()
      .unwrap_or_else(|e| e.into_inner());
    if !set.insert(id.to_string()) {
      return None;
    }
    Some(InFlight {
      set: &self.inner.in_flight,
      id: id.to_string(),
    })
  }

  fn remove(&self, id: &str) {
    if let Err(e) = self.inner.store.remove_action(id) {
      warn!(id, error = %e, "Failed to remove queued action");
    }
  }

  fn lock_timers(&self) -> std::sync::MutexGuard<'_, HashMap<String, Timer>> {
    self
      .inner
      .timers
      .lock()
      .unwrap_or_else(|e| e.into_inner())
  }
}
