//! The executor: one validated candidate in, one normalized result out.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use sibyl_core::config::ExecutorConfig;
use sibyl_core::traits::IQueryBackend;
use sibyl_core::types::{CandidateQuery, ExecutionResult};

/// Grace period past the backend's own deadline before the executor gives
/// up waiting for it to acknowledge cancellation.
const CANCEL_GRACE: Duration = Duration::from_millis(500);

pub struct Executor<'a> {
    backend: &'a dyn IQueryBackend,
    config: &'a ExecutorConfig,
}

impl<'a> Executor<'a> {
    pub fn new(backend: &'a dyn IQueryBackend, config: &'a ExecutorConfig) -> Self {
        Self { backend, config }
    }

    /// Run a validated candidate under the configured deadline.
    ///
    /// On timeout the query is cancelled, never silently retried with the
    /// same shape; the correction loop decides what happens next. On any
    /// other failure the raw error message is captured verbatim for
    /// classification.
    pub async fn run(&self, candidate: &CandidateQuery) -> ExecutionResult {
        let deadline = Duration::from_secs(self.config.deadline_secs);
        let started = Instant::now();

        let outcome = tokio::time::timeout(
            deadline + CANCEL_GRACE,
            self.backend.execute(&candidate.text, deadline),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(rows)) => {
                debug!(
                    rows = rows.rows.len(),
                    elapsed_ms,
                    attempt = candidate.attempt,
                    "query executed"
                );
                ExecutionResult::ok(rows.column_names, rows.rows, elapsed_ms)
            }
            Ok(Err(e)) => {
                warn!(error = %e, attempt = candidate.attempt, "query failed");
                ExecutionResult::failed(e.to_string(), elapsed_ms)
            }
            Err(_) => {
                warn!(
                    deadline_secs = self.config.deadline_secs,
                    attempt = candidate.attempt,
                    "backend missed its deadline and the grace period"
                );
                ExecutionResult::failed(
                    format!("query timed out after {}s", self.config.deadline_secs),
                    elapsed_ms,
                )
            }
        }
    }
}
