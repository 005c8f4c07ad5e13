//! Bounded retry for chunk operations

use std::future::Future;
use std::time::Duration;

use crate::error::{MigrateError, MigrateResult};

/// Default attempts per chunk, including the first
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base backoff between attempts in milliseconds
pub const DEFAULT_BACKOFF_MS: u64 = 200;

/// Retries transient failures up to `max_attempts` with linear backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    /// Run `op` until it succeeds, fails permanently or exhausts the budget.
    ///
    /// `on_error` sees every failed attempt with the attempt number and whether
    /// another attempt follows.
    pub async fn run<T, F, Fut, E>(&self, mut op: F, mut on_error: E) -> MigrateResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = MigrateResult<T>>,
        E: FnMut(u32, &MigrateError, bool),
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let will_retry = err.is_transient() && attempt < self.max_attempts;
                    on_error(attempt, &err, will_retry);
                    if !will_retry {
                        return Err(err);
                    }
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
