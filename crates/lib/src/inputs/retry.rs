//! Bounded retries with exponential backoff for fetches.

use std::time::Duration;

use tracing::warn;

use super::fetch::FetchError;

/// Default number of attempts per fetch (the first try included).
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Delay before the first retry; doubled after every failed attempt.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound for a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub initial_delay: Duration,
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: DEFAULT_ATTEMPTS,
      initial_delay: DEFAULT_INITIAL_DELAY,
      max_delay: DEFAULT_MAX_DELAY,
    }
  }
}

impl RetryPolicy {
  /// Policy with `retries` additional attempts after the first.
  pub fn with_retries(retries: u32) -> Self {
    Self {
      max_attempts: retries.saturating_add(1),
      ..Self::default()
    }
  }

  /// Backoff before attempt `attempt + 1`, given `attempt` failures so far.
  pub fn delay_after(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    self.initial_delay.saturating_mul(factor).min(self.max_delay)
  }

  /// Run `op` until it succeeds, fails permanently, or the attempt budget is
  /// spent. Only errors for which [`FetchError::is_retryable`] holds are retried.
  pub fn run<T>(&self, what: &str, mut op: impl FnMut(u32) -> Result<T, FetchError>) -> Result<T, FetchError> {
    let max_attempts = self.max_attempts.max(1);
    let mut attempt = 1;
    loop {
      match op(attempt) {
        Ok(value) => return Ok(value),
        Err(e) if e.is_retryable() && attempt < max_attempts => {
          let delay = self.delay_after(attempt);
          warn!(
            input = what,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "fetch failed, retrying"
          );
          std::thread::sleep(delay);
          attempt += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }
}
