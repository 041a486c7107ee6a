//! Bounded retries with exponential backoff and jitter.
//!
//! For single calls that fail transiently while the platform warms up: a
//! route that answers 503 until the router picks it up, a webhook that is not
//! serving yet. Waiting for cluster state to converge is the job of the
//! samplers in `odh-e2e`, which poll at a fixed interval instead.
//!
//! ```ignore
//! use odh_common::retry::{retry_with_backoff, RetryConfig};
//!
//! let resp = retry_with_backoff(&RetryConfig::route_warmup(), "get_models", || async {
//!     fetch_models(&client, &url).await
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// How often and how patiently to retry.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Attempts including the first; always at least one is made
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for the delay before jitter
    pub max_delay: Duration,
    /// Growth factor applied to the delay after each failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A freshly-created route: up to 15 attempts, 2s growing by 1.5x to 10s
    pub fn route_warmup() -> Self {
        Self {
            max_attempts: 15,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 1.5,
        }
    }

    /// Create calls racing an admission webhook that is still starting
    pub fn webhook() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 2.0,
        }
    }

    /// Un-jittered delays between attempts, `max_attempts - 1` of them
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let cap = self.max_delay.as_secs_f64();
        std::iter::successors(Some(self.initial_delay.as_secs_f64().min(cap)), move |d| {
            Some((d * self.backoff_multiplier).min(cap))
        })
        .map(Duration::from_secs_f64)
        .take(self.max_attempts.saturating_sub(1) as usize)
    }
}

/// Scale a delay by a random factor in `[0.5, 1.5)`
fn jittered(delay: Duration) -> Duration {
    delay.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
}

/// Run `operation` until it succeeds or the attempts in `config` run out,
/// returning the last error in that case.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_if(config, operation_name, |_| true, operation).await
}

/// Like [`retry_with_backoff`], but errors rejected by `should_retry` are
/// returned at once (a 403 does not become a 200 by asking again).
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut delays = config.delays();
    let mut attempt = 1u32;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => e,
        };

        let Some(delay) = delays.next() else {
            error!(operation = %operation_name, attempt, error = %err, "giving up");
            return Err(err);
        };
        let delay = jittered(delay);
        warn!(
            operation = %operation_name,
            attempt,
            error = %err,
            delay_ms = delay.as_millis(),
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
