use std::time::Duration;

/// Number of failed replays after which an action is dropped.
pub const MAX_RETRIES: u32 = 3;

/// Base of the exponential backoff between replays, in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: MAX_RETRIES,
      base_delay_ms: RETRY_DELAY_MS,
    }
  }
}

impl RetryPolicy {
  /// An action with this many failed replays must not be replayed again.
  pub fn is_exhausted(&self, retries: u32) -> bool {
    retries >= self.max_retries
  }

  /// Wait before the next replay of an action that has failed `retries`
  /// times: `base × 2^retries`.
  pub fn delay(&self, retries: u32) -> Duration {
    let factor = 1u64.checked_shl(retries).unwrap_or(u64::MAX);
    Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backoff_doubles_from_base() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay(1), Duration::from_secs(2));
    assert_eq!(policy.delay(2), Duration::from_secs(4));
    assert_eq!(policy.delay(3), Duration::from_secs(8));
    for n in 0..10 {
      assert_eq!(policy.delay(n + 1), policy.delay(n) * 2);
    }
  }

  #[test]
  fn test_exhaustion_bound() {
    let policy = RetryPolicy::default();
    assert!(!policy.is_exhausted(2));
    assert!(policy.is_exhausted(3));
    assert!(policy.is_exhausted(4));
  }

  #[test]
  fn test_huge_retry_counts_saturate() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay(80), Duration::from_millis(u64::MAX));
  }
}
