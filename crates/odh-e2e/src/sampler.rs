//! Fixed-interval polling against an eventually-consistent control plane.
//!
//! Every wait in this crate is a `TimeoutSampler`: fetch a sample, inspect
//! it, sleep a fixed interval, give up after a fixed budget. Fetches that fail
//! with a retryable error (by default: any error) are remembered so the
//! eventual timeout says *why* the state never converged.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use odh_common::Error;
use tokio::time::Instant;
use tracing::{debug, trace};

type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Retry everything: a sampling error just means "not yet"
pub fn retry_any(_: &Error) -> bool {
    true
}

/// Retry only 404s and empty lookups
pub fn retry_not_found(err: &Error) -> bool {
    err.is_not_found()
}

/// Polls an async fetch at a fixed interval until a sample is accepted or the
/// budget runs out.
#[derive(Clone)]
pub struct TimeoutSampler {
    description: String,
    wait_timeout: Duration,
    sleep: Duration,
    retry_on: RetryPredicate,
}

impl Debug for TimeoutSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutSampler")
            .field("description", &self.description)
            .field("wait_timeout", &self.wait_timeout)
            .field("sleep", &self.sleep)
            .finish()
    }
}

impl TimeoutSampler {
    /// Sampler that retries on any sampling error
    pub fn new(description: impl Into<String>, wait_timeout: Duration, sleep: Duration) -> Self {
        Self {
            description: description.into(),
            wait_timeout,
            sleep,
            retry_on: Arc::new(retry_any),
        }
    }

    /// Only errors accepted by `predicate` are retried; others abort the wait
    pub fn retry_on<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Arc::new(predicate);
        self
    }

    /// Shorthand for `retry_on(retry_not_found)`
    pub fn retry_not_found(self) -> Self {
        self.retry_on(retry_not_found)
    }

    /// Overall budget
    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// What this sampler waits for, as used in logs and errors
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Sample until `accept` returns true for a sample, returning that sample.
    ///
    /// The first sample is taken immediately. On expiry the error carries the
    /// text of the last retryable error, or none if the last sample succeeded
    /// but its sample was rejected.
    pub async fn wait_until<T, F, Fut, A>(&self, mut fetch: F, mut accept: A) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
        A: FnMut(&T) -> bool,
    {
        let start = Instant::now();
        let mut last_error: Option<String> = None;
        let mut samples = 0u32;

        loop {
            samples += 1;
            match fetch().await {
                Ok(sample) => {
                    if accept(&sample) {
                        debug!(
                            wait = %self.description,
                            samples,
                            elapsed_ms = start.elapsed().as_millis(),
                            "condition met"
                        );
                        return Ok(sample);
                    }
                    last_error = None;
                }
                Err(e) if (self.retry_on)(&e) => {
                    trace!(wait = %self.description, error = %e, "sample failed, retrying");
                    last_error = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }

            if start.elapsed() >= self.wait_timeout {
                return Err(Error::timeout(
                    self.description.clone(),
                    self.wait_timeout,
                    last_error,
                ));
            }
            tokio::time::sleep(self.sleep).await;
        }
    }

    /// Sample until the fetch returns `Ok(true)`
    pub async fn wait_for_true<F, Fut>(&self, fetch: F) -> Result<(), Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, Error>>,
    {
        self.wait_until(fetch, |done| *done).await.map(|_| ())
    }

    /// The inverse of [`wait_until`](Self::wait_until): every sample must
    /// satisfy `invariant` for the whole budget.
    ///
    /// Reaching the timeout is success. The first violating sample fails with
    /// a validation error naming the sample and how long the invariant held.
    pub async fn hold<T, F, Fut, I>(&self, mut fetch: F, mut invariant: I) -> Result<(), Error>
    where
        T: Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
        I: FnMut(&T) -> bool,
    {
        let start = Instant::now();

        loop {
            match fetch().await {
                Ok(sample) if invariant(&sample) => {}
                Ok(sample) => {
                    return Err(Error::validation(format!(
                        "{} stopped holding after {:?}: {:?}",
                        self.description,
                        start.elapsed(),
                        sample
                    )));
                }
                Err(e) if (self.retry_on)(&e) => {
                    trace!(wait = %self.description, error = %e, "sample failed, retrying");
                }
                Err(e) => return Err(e),
            }

            if start.elapsed() >= self.wait_timeout {
                debug!(wait = %self.description, "held for the whole window");
                return Ok(());
            }
            tokio::time::sleep(self.sleep).await;
        }
    }
}

/// One overall budget shared by several sequential waits.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutWatch {
    start: Instant,
    timeout: Duration,
}

impl TimeoutWatch {
    /// Start the clock
    pub fn new(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    /// Budget left, zero once spent
    pub fn remaining_time(&self) -> Duration {
        self.timeout.saturating_sub(self.start.elapsed())
    }

    /// True once the budget is spent
    pub fn is_expired(&self) -> bool {
        self.remaining_time().is_zero()
    }
}
