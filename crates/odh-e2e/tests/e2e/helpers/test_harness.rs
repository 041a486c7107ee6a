//! Run-all-and-report execution for a scenario's checks.
//!
//! A failing check does not stop the others; `finish` logs one summary
//! and fails if anything failed.
#![cfg(feature = "cluster-e2e")]

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{error, info, warn};

const MAX_ERROR_LEN: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(String),
    Skipped(String),
}

#[derive(Debug)]
struct CheckRecord {
    name: String,
    outcome: Outcome,
    elapsed: Duration,
}

pub struct TestHarness {
    scenario: String,
    checks: Mutex<Vec<CheckRecord>>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

fn truncate(msg: &str) -> String {
    if msg.chars().count() <= MAX_ERROR_LEN {
        msg.to_string()
    } else {
        let head: String = msg.chars().take(MAX_ERROR_LEN).collect();
        format!("{head}...")
    }
}

impl TestHarness {
    pub fn new(scenario: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            checks: Mutex::new(Vec::new()),
        }
    }

    /// Run one check, recording errors and panics instead of propagating them.
    ///
    /// Returns whether the check passed so later checks can depend on it.
    pub async fn run<F, Fut, E>(&self, name: &str, f: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        info!(scenario = %self.scenario, check = name, "check started");
        let start = Instant::now();
        let outcome = match AssertUnwindSafe(f()).catch_unwind().await {
            Ok(Ok(())) => Outcome::Passed,
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(payload) => Outcome::Failed(format!("panicked: {}", panic_message(&*payload))),
        };
        let passed = outcome == Outcome::Passed;
        self.record(name, outcome, start.elapsed());
        passed
    }

    /// Record a check that could not run because something it needs failed
    pub fn skip(&self, name: &str, reason: &str) {
        self.record(name, Outcome::Skipped(reason.to_string()), Duration::ZERO);
    }

    fn record(&self, name: &str, outcome: Outcome, elapsed: Duration) {
        match &outcome {
            Outcome::Passed => info!(check = name, elapsed_s = elapsed.as_secs_f64(), "check passed"),
            Outcome::Failed(e) => error!(check = name, error = %truncate(e), "check failed"),
            Outcome::Skipped(reason) => warn!(check = name, %reason, "check skipped"),
        }
        self.checks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(CheckRecord {
                name: name.to_string(),
                outcome,
                elapsed,
            });
    }

    /// Log the summary table; `Err` lists failed and skipped checks
    pub fn finish(&self) -> Result<(), String> {
        let checks = self
            .checks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = |want: fn(&Outcome) -> bool| checks.iter().filter(|c| want(&c.outcome)).count();
        let passed = count(|o| matches!(o, Outcome::Passed));
        let failed = count(|o| matches!(o, Outcome::Failed(_)));
        let skipped = count(|o| matches!(o, Outcome::Skipped(_)));
        let total: Duration = checks.iter().map(|c| c.elapsed).sum();

        info!("=== {} ===", self.scenario);
        for check in checks.iter() {
            let (tag, detail) = match &check.outcome {
                Outcome::Passed => ("ok  ", String::new()),
                Outcome::Failed(e) => ("FAIL", truncate(e)),
                Outcome::Skipped(reason) => ("skip", reason.clone()),
            };
            info!(
                "{tag} {:<36} {:>7.1}s {detail}",
                check.name,
                check.elapsed.as_secs_f64()
            );
        }
        info!(
            "{passed} passed, {failed} failed, {skipped} skipped in {:.1}s",
            total.as_secs_f64()
        );

        if failed + skipped == 0 {
            return Ok(());
        }
        let not_passed: Vec<&str> = checks
            .iter()
            .filter(|c| c.outcome != Outcome::Passed)
            .map(|c| c.name.as_str())
            .collect();
        Err(format!(
            "{}: {failed} failed, {skipped} skipped ({})",
            self.scenario,
            not_passed.join(", ")
        ))
    }
}
