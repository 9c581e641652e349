//! Exponential reconnect backoff.
//!
//! [`Backoff`] sleeps for a growing delay after each failure, capped at a
//! maximum, and resets on success. [`Backoff::until`] wraps an operation in
//! that policy with an optional bound on the number of retries.

use futures::future::BoxFuture;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// How many times [`Backoff::until`] may retry a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    /// Fail on the first error
    Never,
    /// Retry until the operation succeeds
    Forever,
    /// Retry at most this many times after the first attempt
    Retries(u32),
}

impl RetryLimit {
    /// Map a signed count: 0 never retries, negative retries forever
    pub fn from_count(count: i64) -> Self {
        match count {
            0 => RetryLimit::Never,
            n if n < 0 => RetryLimit::Forever,
            n => RetryLimit::Retries(u32::try_from(n).unwrap_or(u32::MAX)),
        }
    }
}

/// Backoff policy parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// First delay, and the delay after a reset
    pub initial: Duration,
    /// Delay ceiling
    pub max_delay: Duration,
    /// Multiplier applied after each failure
    pub factor: f64,
    /// Retry bound for [`Backoff::until`]
    pub limit: RetryLimit,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max_delay: Duration::from_secs(5 * 60),
            factor: 2.0,
            limit: RetryLimit::Forever,
        }
    }
}

/// Error returned by [`Backoff::until`]
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// The operation failed and retrying was not allowed
    #[error("{0}")]
    Failed(E),

    /// Every allowed attempt failed
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of times the operation ran
        attempts: u32,
        /// Error from the final attempt
        last: E,
    },
}

/// Backoff state
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Start a fresh backoff at the policy's initial delay
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.initial,
            policy,
            attempts: 0,
        }
    }

    /// Delay the next failure will sleep for
    pub fn delay(&self) -> Duration {
        self.current
    }

    /// Failures since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Sleep for the current delay, then grow it
    pub async fn fail(&mut self) {
        tokio::time::sleep(self.current).await;
        self.attempts = self.attempts.saturating_add(1);
        self.current = self.next_delay();
    }

    /// Reset to the initial delay and zero attempts
    pub fn success(&mut self) {
        self.current = self.policy.initial;
        self.attempts = 0;
    }

    fn next_delay(&self) -> Duration {
        let next = self.current.as_secs_f64() * self.policy.factor;
        Duration::try_from_secs_f64(next)
            .map(|delay| delay.min(self.policy.max_delay))
            .unwrap_or(self.policy.max_delay)
    }

    /// Run `op` against `target` until it succeeds or the retry limit is hit.
    ///
    /// With [`RetryLimit::Never`] the first error is returned as
    /// [`RetryError::Failed`]. With [`RetryLimit::Retries`]`(n)` the
    /// operation runs at most `n + 1` times before
    /// [`RetryError::Exhausted`]. With [`RetryLimit::Forever`] this only
    /// returns on success.
    pub async fn until<R, T, E, F>(
        &mut self,
        what: &str,
        target: &mut R,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        R: ?Sized,
        E: fmt::Display,
        F: for<'a> FnMut(&'a mut R) -> BoxFuture<'a, Result<T, E>>,
    {
        let mut calls: u32 = 0;

        loop {
            calls = calls.saturating_add(1);

            let err = match op(target).await {
                Ok(value) => {
                    if calls > 1 {
                        debug!("{} succeeded after {} attempts", what, calls);
                    }
                    self.success();
                    return Ok(value);
                }
                Err(err) => err,
            };

            match self.policy.limit {
                RetryLimit::Never => return Err(RetryError::Failed(err)),
                RetryLimit::Retries(n) if calls > n => {
                    return Err(RetryError::Exhausted {
                        attempts: calls,
                        last: err,
                    });
                }
                _ => {}
            }

            warn!(
                "{} failed (attempt {}): {}; retrying in {:?}",
                what, calls, err, self.current
            );
            self.fail().await;
        }
    }
}
