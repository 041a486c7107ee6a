//! Best-effort teardown for scenario resources.

use std::fmt::Display;
use std::future::Future;

use tracing::{debug, warn};

/// Run one teardown step, logging a failure instead of returning it.
///
/// Returns whether the step succeeded. A scenario's verdict comes from its
/// checks, so a namespace that refuses to go away only earns a warning.
pub async fn best_effort<T, E, F>(step: &str, fut: F) -> bool
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match fut.await {
        Ok(_) => {
            debug!(step, "teardown step done");
            true
        }
        Err(e) => {
            warn!(step, error = %e, "teardown step failed");
            false
        }
    }
}
