//! Bounded retry with linear backoff and a hard deadline over all attempts.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Result of a single attempt, classified by the caller.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    Retryable(E),
    Fatal(E),
}

#[derive(Debug, Error)]
pub enum RetryError<E: std::fmt::Display> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("non-retryable failure: {0}")]
    Fatal(E),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Sleep after failed attempt `n` is `n * backoff_unit`.
    pub backoff_unit: Duration,
    /// Deadline covering every attempt and backoff sleep together.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(attempt)
    }
}

/// Run `op` until it succeeds, fails fatally, runs out of attempts, or the
/// policy deadline passes. `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    match tokio::time::timeout(policy.timeout, attempts(policy, op)).await {
        Ok(res) => res,
        Err(_) => Err(RetryError::TimedOut(policy.timeout)),
    }
}

async fn attempts<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(err) => return Err(RetryError::Fatal(err)),
            Attempt::Retryable(err) => {
                if attempt >= max {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                let wait = policy.backoff_for(attempt);
                debug!(attempt, max, %err, ?wait, "attempt failed; backing off");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
