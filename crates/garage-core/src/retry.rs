//! Retry policy for sensor acquisition.
//!
//! Attempts are spaced linearly: after the attempt with 0-based index `i`
//! fails, the caller waits `interval * (i + 1)` before trying again. There is
//! no wait after the final attempt.
//!
//! # Example
//!
//! ```
//! use garage_core::{RetryPolicy, with_retry, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! let policy = RetryPolicy::steady_state();
//!
//! let value = with_retry(&policy, "read_sensor", |_attempt| async {
//!     Ok::<_, Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, at least 1.
    pub attempts: u32,
    /// Base spacing between attempts.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::steady_state()
    }
}

impl RetryPolicy {
    /// Attempts used by every scheduled update and by manual refreshes.
    pub const STEADY_STATE_ATTEMPTS: u32 = 3;
    pub const STEADY_STATE_INTERVAL: Duration = Duration::from_secs(2);

    /// Attempts used inside each bootstrap round at process start.
    pub const BOOTSTRAP_ATTEMPTS: u32 = 2;
    pub const BOOTSTRAP_INTERVAL: Duration = Duration::from_secs(3);

    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }

    /// 3 attempts, 2 s base interval.
    pub fn steady_state() -> Self {
        Self::new(Self::STEADY_STATE_ATTEMPTS, Self::STEADY_STATE_INTERVAL)
    }

    /// 2 attempts, 3 s base interval.
    pub fn bootstrap() -> Self {
        Self::new(Self::BOOTSTRAP_ATTEMPTS, Self::BOOTSTRAP_INTERVAL)
    }

    /// A single attempt.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Set the number of attempts.
    #[must_use]
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Set the base interval.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Wait after the attempt with 0-based index `attempt` failed, or `None`
    /// if it was the last one.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.attempts {
            None
        } else {
            Some(self.interval * (attempt + 1))
        }
    }
}

/// Run `operation` under `policy`, passing it the 0-based attempt index.
///
/// Returns the first success, or the error from the final attempt.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) => match policy.delay_after(attempt) {
                Some(delay) if !matches!(e, Error::Cancelled) => {
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation_name,
                        attempt + 1,
                        policy.attempts,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                _ => return Err(e),
            },
        }
    }
}
