//! Bounded retry loop
//!
//! Every error is retryable here; deciding what is worth an attempt is the
//! caller's business (the client treats breaker rejections, transport failures
//! and 5xx responses alike). Attempts run strictly one after another.

use crate::backoff::Backoff;
use std::error::Error;
use std::fmt;
use std::future::Future;
use tokio::time::sleep;

/// How many extra attempts to make and how long to wait before each
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    /// Attempts beyond the first; zero means a single attempt
    pub retry_count: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(retry_count: u32, backoff: Backoff) -> Self {
        Self {
            retry_count,
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

/// Final error of a retried operation
#[derive(Debug)]
pub struct RetryError<E> {
    /// Attempts actually made
    pub attempts: u32,
    /// Error of the last attempt
    pub error: E,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempt(s): {}", self.attempts, self.error)
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

/// Retry executor
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt` until it succeeds or the policy is exhausted
    ///
    /// `attempt` receives the 0-based attempt index.
    pub async fn run<F, Fut, T, E>(&self, attempt: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.run_with(attempt, |_, _| {}).await
    }

    /// Like `run`, handing every error that leads to another attempt to `on_retry`
    pub async fn run_with<F, Fut, T, E, R>(
        &self,
        mut attempt: F,
        mut on_retry: R,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        R: FnMut(u32, E),
    {
        let mut index = 0;

        loop {
            let error = match attempt(index).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if index >= self.policy.retry_count {
                tracing::debug!(
                    attempts = index + 1,
                    max_attempts = self.policy.max_attempts(),
                    error = %error,
                    "retries exhausted"
                );
                return Err(RetryError {
                    attempts: index + 1,
                    error,
                });
            }

            let delay = self.policy.backoff.next(index);
            tracing::debug!(
                attempt = index,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, backing off"
            );
            on_retry(index, error);

            if !delay.is_zero() {
                sleep(delay).await;
            }
            index += 1;
        }
    }
}
