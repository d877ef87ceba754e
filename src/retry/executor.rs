//! Retry loop.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::RetryPolicy;

/// Error type for retried operations.
#[derive(thiserror::Error, Debug)]
pub enum RetryError<E> {
    /// Cancellation was observed before an attempt.
    #[error("Retry cancelled")]
    Cancelled,

    /// The policy allows zero attempts.
    #[error("Retry policy allows no attempts")]
    NoAttempts,

    /// Every attempt failed; `last` is the final failure.
    #[error("Max retries reached after {attempts} attempts. Last error: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },
}

impl<E> RetryError<E> {
    /// The last operation error, if attempts were exhausted.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}

/// Runs an operation until it succeeds or the policy gives up.
///
/// Cancellation is checked before each attempt only. A token cancelled
/// while the executor sleeps takes effect once the sleep ends, so the
/// worst-case reaction time is one full backoff delay.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` with retries.
    ///
    /// Every failed attempt is followed by the policy's backoff delay,
    /// the last one included.
    ///
    /// # Errors
    ///
    /// Returns `RetryError::Cancelled` if `cancel` fires before an attempt,
    /// `RetryError::NoAttempts` for a zero-attempt policy, and
    /// `RetryError::Exhausted` with the last failure otherwise.
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let started = Instant::now();
        let mut last = None;

        for attempt in 1..=self.policy.max_attempts {
            tracing::info!(
                attempt,
                elapsed_secs = started.elapsed().as_secs_f64(),
                "Attempt"
            );

            if cancel.is_cancelled() {
                tracing::info!(attempt, "Retry cancelled");
                return Err(RetryError::Cancelled);
            }

            match operation().await {
                Ok(value) => {
                    tracing::info!(attempt, "Operation succeeded");
                    return Ok(value);
                }
                Err(e) => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(attempt, error = %e, ?delay, "Operation failed");
                    tokio::time::sleep(delay).await;
                    last = Some(e);
                }
            }
        }

        match last {
            Some(last) => Err(RetryError::Exhausted {
                attempts: self.policy.max_attempts,
                last,
            }),
            None => Err(RetryError::NoAttempts),
        }
    }
}

/// Retry `operation` up to `max_attempts` times with linear backoff of
/// `base_delay_secs` per attempt plus up to three seconds of jitter.
///
/// # Errors
///
/// See [`RetryExecutor::run`].
pub async fn retry_with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    base_delay_secs: u64,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let policy = RetryPolicy::new(max_attempts, Duration::from_secs(base_delay_secs));
    RetryExecutor::new(policy).run(cancel, operation).await
}
