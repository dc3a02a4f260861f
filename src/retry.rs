//! Retry with linear backoff
//!
//! Used for the destructive index replace (with a pre-attempt hook that
//! invalidates cached storage handles) and for transient embedding requests.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Bounded retry schedule: attempt `n` (0-based) waits `base_delay * n` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

/// Returned when every attempt failed
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    /// At least one attempt is always made
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept before the given attempt
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Run `op` until it succeeds or attempts run out.
    ///
    /// `before_attempt` runs ahead of every attempt, including the first.
    pub async fn run<T, E, H, F, Fut>(
        &self,
        before_attempt: H,
        op: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        E: Display,
        H: FnMut(u32),
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_while(before_attempt, op, |_| true).await
    }

    /// Like [`RetryPolicy::run`], but stops early on errors `should_retry` rejects
    pub async fn run_while<T, E, H, F, Fut, P>(
        &self,
        mut before_attempt: H,
        mut op: F,
        should_retry: P,
    ) -> Result<T, RetryExhausted<E>>
    where
        E: Display,
        H: FnMut(u32),
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            before_attempt(attempt);

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let attempts = attempt + 1;
                    if attempts >= self.max_attempts || !should_retry(&e) {
                        return Err(RetryExhausted {
                            attempts,
                            last_error: e,
                        });
                    }
                    tracing::warn!(
                        "Attempt {}/{} failed: {}",
                        attempts,
                        self.max_attempts,
                        e
                    );
                }
            }
            attempt += 1;
        }
    }
}
