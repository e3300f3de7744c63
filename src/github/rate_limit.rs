//! Hourly request quota with exponential backoff on rate-limit responses.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::config::RateLimitConfig;
use crate::error::{Result, StorageError};

/// Length of the sliding quota window
const WINDOW: Duration = Duration::from_secs(60 * 60);

/// Throttles calls to `requests_per_hour` and retries rate-limited calls.
///
/// Only [`StorageError::RateLimited`] is retried; every other error is
/// returned as is on the first failure.
pub struct RateLimiter {
  config: RateLimitConfig,
  /// Dispatch instants within the last hour, oldest first
  window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
  pub fn new(config: RateLimitConfig) -> Self {
    Self {
      config,
      window: Mutex::new(VecDeque::new()),
    }
  }

  /// Run `operation` under the quota, retrying rate-limit failures after
  /// `retry_delay * 2^attempt`.
  pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let mut attempt: u32 = 0;
    loop {
      self.acquire_slot().await;

      match operation().await {
        Err(e) if e.is_rate_limited() => {
          if attempt >= self.config.max_retries {
            warn!(attempts = attempt + 1, error = %e, "rate limit retries exhausted");
            return Err(StorageError::RateLimitExceeded {
              attempts: attempt + 1,
            });
          }
          let delay = self.backoff(attempt);
          warn!(attempt, delay_ms = delay.as_millis() as u64, "rate limited, backing off");
          sleep(delay).await;
          attempt += 1;
        }
        result => return result,
      }
    }
  }

  fn backoff(&self, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    Duration::from_millis(self.config.retry_delay_ms.saturating_mul(factor))
  }

  /// Wait for a free slot in the window and record the dispatch.
  ///
  /// The lock is held while waiting so concurrent callers cannot both claim
  /// the last slot.
  async fn acquire_slot(&self) {
    let quota = self.quota();
    let mut window = self.window.lock().await;

    loop {
      let now = Instant::now();
      while window.front().is_some_and(|t| now.duration_since(*t) >= WINDOW) {
        window.pop_front();
      }

      if window.len() < quota {
        window.push_back(now);
        return;
      }

      if let Some(oldest) = window.front().copied() {
        let wait = (oldest + WINDOW).saturating_duration_since(now);
        debug!(wait_ms = wait.as_millis() as u64, "request quota reached, waiting");
        sleep(wait).await;
      }
    }
  }

  /// Requests still available in the current window.
  pub async fn remaining(&self) -> usize {
    let now = Instant::now();
    let window = self.window.lock().await;
    let used = window
      .iter()
      .filter(|t| now.duration_since(**t) < WINDOW)
      .count();
    self.quota().saturating_sub(used)
  }

  /// Requests allowed per window; a zero setting still admits one.
  fn quota(&self) -> usize {
    self.config.requests_per_hour.max(1) as usize
  }
}
