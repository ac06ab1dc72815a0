//! Bounded retry with a fixed delay
//!
//! The policy is a value passed to whoever needs it; nothing here reads the
//! environment. Only `Err` results are retried, so soft failures that a load
//! already recovered from are returned on the first attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// `{max_attempts, delay}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Policy with `max_attempts` total attempts (at least one)
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Policy expressed as retries after the first attempt
    pub fn from_retries(retries: u32, delay: Duration) -> Self {
        Self::new(retries.saturating_add(1), delay)
    }

    /// Single attempt
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_retries(
            crate::config::DEFAULT_TASK_MAX_RETRIES,
            Duration::from_secs(crate::config::DEFAULT_TASK_RETRY_DELAY_SECS),
        )
    }
}

/// Run `operation` until it succeeds or the policy is exhausted
///
/// Returns the last error when every attempt failed.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    "{} failed: {}. Retrying in {:?}",
                    label,
                    e,
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            },
            Err(e) => {
                error!(attempts = attempt, "{} failed: {}", label, e);
                return Err(e);
            },
        }
    }
}
