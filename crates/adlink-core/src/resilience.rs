//! Retry logic with exponential backoff.
//!
//! Only transient errors (see [`DirectoryError::is_transient`]) are retried.
//! Backoff sleeps race the caller's cancellation token.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::{DirectoryError, DirectoryResult};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Initial delay before first retry.
    pub initial_backoff: Duration,
    /// Maximum delay between retries.
    pub max_backoff: Duration,
    /// Whether to add up to 25% jitter to delays.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            jitter: settings.jitter,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Retry executor with exponential backoff.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create a new retry executor with the given policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The active policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Delay before retry number `attempt` (0-indexed), without jitter.
    fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.policy
            .initial_backoff
            .saturating_mul(factor)
            .min(self.policy.max_backoff)
    }

    /// Delay before retry number `attempt`, with jitter when enabled.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if self.policy.jitter {
            let jitter_factor = 1.0 + rand::thread_rng().gen_range(0.0..=0.25);
            delay.mul_f64(jitter_factor)
        } else {
            delay
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry
    /// budget is spent.
    ///
    /// Exhausting the budget on a transient error yields
    /// [`DirectoryError::RetryExhausted`] wrapping the last error. A fired
    /// `cancel` token yields [`DirectoryError::Cancelled`] before the next
    /// attempt or during a backoff sleep.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> DirectoryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DirectoryResult<T>>,
    {
        let attempts = self.policy.max_retries.saturating_add(1);

        for attempt in 0..attempts {
            if cancel.is_cancelled() {
                return Err(DirectoryError::Cancelled);
            }

            let error = match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            if !error.is_transient() {
                return Err(error);
            }

            if attempt + 1 == attempts {
                warn!(
                    attempts,
                    error = %error,
                    "Giving up after repeated transient errors"
                );
                return Err(DirectoryError::RetryExhausted {
                    attempts,
                    source: Box::new(error),
                });
            }

            let delay = self.calculate_delay(attempt);
            debug!(
                attempt = attempt + 1,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after transient error"
            );

            tokio::select! {
                () = cancel.cancelled() => return Err(DirectoryError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }

        // Only reachable when `attempts` is zero, which saturating_add rules out.
        Err(DirectoryError::internal("retry loop ran zero attempts"))
    }
}
