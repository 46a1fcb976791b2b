//! Online/offline state shared between the interceptor and the sync engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Answers "do we believe we're online right now?".
pub trait ConnectivityProbe: Send + Sync + 'static {
  fn is_online(&self) -> bool;
}

/// Shared online flag, flipped by the connectivity monitor (or by tests).
#[derive(Debug, Clone)]
pub struct OnlineFlag {
  online: Arc<AtomicBool>,
}

impl OnlineFlag {
  pub fn new(online: bool) -> Self {
    Self {
      online: Arc::new(AtomicBool::new(online)),
    }
  }

  /// Record the latest observation. Returns true on an offline -> online
  /// transition.
  pub fn set_online(&self, online: bool) -> bool {
    let was_online = self.online.swap(online, Ordering::SeqCst);
    online && !was_online
  }
}

impl Default for OnlineFlag {
  fn default() -> Self {
    Self::new(true)
  }
}

impl ConnectivityProbe for OnlineFlag {
  fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_reports_restored_transition_once() {
    let flag = OnlineFlag::new(false);
    assert!(!flag.is_online());
    assert!(flag.set_online(true));
    assert!(flag.is_online());
    assert!(!flag.set_online(true));
  }

  #[test]
  fn test_going_offline_is_not_a_restore() {
    let flag = OnlineFlag::default();
    assert!(!flag.set_online(false));
    assert!(!flag.is_online());
  }

  #[test]
  fn test_clones_share_state() {
    let flag = OnlineFlag::default();
    let other = flag.clone();
    other.set_online(false);
    assert!(!flag.is_online());
  }
}
