//! Bounded retry with a fixed delay between attempts.
//!
//! Every remote step that can fail transiently (readiness probes, archive
//! extraction, remote updates) goes through [`RetryPolicy::run`], so all call
//! sites share one policy: up to `max_attempts` tries, a fixed pause between
//! them, no pause after the last one, and every failure kept in the returned
//! aggregate.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{AppError, ErrorList, Result};

/// Delay between two attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retry policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Pause before every attempt except the first
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Runs `operation` until it succeeds or the attempts are used up.
    ///
    /// The closure receives the 1-based attempt number. On exhaustion the
    /// error is [`AppError::Multiple`] holding one entry per failed attempt.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.max_attempts < 1 {
            return Err(AppError::InvalidAttempts {
                name: "attempts".to_string(),
                value: i64::from(self.max_attempts),
            });
        }

        let mut errors = ErrorList::new();
        for attempt in 1..=self.max_attempts {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "Attempt failed"
                    );
                    errors.push(error);
                }
            }
            if attempt < self.max_attempts {
                sleep(self.delay).await;
            }
        }

        Err(AppError::Multiple(errors))
    }
}

/// Shorthand for [`RetryPolicy::new`] followed by [`RetryPolicy::run`].
pub async fn retry<T, F, Fut>(max_attempts: u32, operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryPolicy::new(max_attempts).run(operation).await
}
