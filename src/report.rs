//! Run-all-and-report scenario execution.
//!
//! Each scenario emits one structured event as it finishes, so a live run can
//! be followed in the log. [`ScenarioReport::finish`] adds a one-line verdict.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::{Error, Result};

/// Longest error carried in a log event
const MAX_ERROR_CHARS: usize = 200;

/// Outcome of one scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Results of a suite run, in execution order
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    suite: String,
    results: Vec<ScenarioResult>,
}

impl ScenarioReport {
    pub fn new(suite: &str) -> Self {
        Self {
            suite: suite.to_string(),
            results: Vec::new(),
        }
    }

    /// Run one scenario and record its outcome. Panics count as failures.
    pub async fn run<F, Fut>(&mut self, name: &str, f: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let start = Instant::now();
        let error = match AssertUnwindSafe(f()).catch_unwind().await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
        };
        self.record(name, start.elapsed(), error);
    }

    /// Record an outcome; `None` means the scenario passed.
    pub fn record(&mut self, name: &str, duration: Duration, error: Option<String>) {
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        match error {
            None => info!(suite = %self.suite, scenario = %name, duration_ms, "Scenario passed"),
            Some(ref e) => warn!(
                suite = %self.suite,
                scenario = %name,
                duration_ms,
                error = %truncate(e, MAX_ERROR_CHARS),
                "Scenario failed"
            ),
        }
        self.results.push(ScenarioResult {
            name: name.to_string(),
            passed: error.is_none(),
            duration_ms,
            error,
        });
    }

    pub fn results(&self) -> &[ScenarioResult] {
        &self.results
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.passed).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn failed_names(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.name.as_str())
            .collect()
    }

    /// One-line verdict, e.g. `tripleo: 4/5 passed in 12.3s, failed: hosts`.
    pub fn verdict(&self) -> String {
        let total_ms: u64 = self.results.iter().map(|r| r.duration_ms).sum();
        let mut line = format!(
            "{}: {}/{} passed in {:.1}s",
            self.suite,
            self.passed(),
            self.results.len(),
            total_ms as f64 / 1000.0
        );
        if !self.is_success() {
            line.push_str(", failed: ");
            line.push_str(&self.failed_names().join(", "));
        }
        line
    }

    /// Log the verdict and fail if any scenario failed.
    pub fn finish(&self) -> Result<()> {
        if self.is_success() {
            info!("{}", self.verdict());
            return Ok(());
        }
        error!("{}", self.verdict());
        let failures = self.failed_names();
        Err(Error::assertion(format!(
            "{} scenario(s) failed in {}: {}",
            failures.len(),
            self.suite,
            failures.join(", ")
        )))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
