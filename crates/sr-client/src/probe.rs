//! Latency probing
//!
//! Probes every catalog entry with bounded concurrency, folds the results
//! back by address and port, then re-sorts the catalog so the fastest
//! reachable servers come first.

use std::sync::Arc;

use sr_core::{ProxyEngine, SrError};

use crate::state::ClientState;

/// Outcome of one probe batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    pub tested: usize,
    pub reachable: usize,
}

/// Clears the running flag however the batch ends
struct RunningFlag<'a>(&'a ClientState);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.update(|shared| shared.probe_running = false);
    }
}

pub struct LatencyProbe {
    state: Arc<ClientState>,
    engine: Arc<dyn ProxyEngine>,
}

impl LatencyProbe {
    pub fn new(state: Arc<ClientState>, engine: Arc<dyn ProxyEngine>) -> Self {
        Self { state, engine }
    }

    /// Probe the whole catalog. Only one batch may run at a time.
    pub async fn run(&self) -> Result<ProbeSummary, SrError> {
        let targets = {
            let mut shared = self.state.write();
            if shared.probe_running {
                return Err(SrError::AlreadyInProgress("latency test"));
            }
            if shared.catalog.is_empty() {
                drop(shared);
                self.state.activity.info("No servers to test");
                return Ok(ProbeSummary::default());
            }
            shared.probe_running = true;
            shared.catalog.probe_targets()
        };
        let _running = RunningFlag(&self.state);
        self.state.request_redraw();

        let probe = &self.state.config.probe;
        self.state.activity.info(format!(
            "Testing latency for {} servers (concurrency {})...",
            targets.len(),
            probe.concurrency
        ));

        let outcome = self
            .engine
            .probe_batch(&targets, probe.concurrency, probe.timeout)
            .await;

        let results = match outcome {
            Ok(results) => results,
            Err(e) => {
                // Nothing measured: every entry is marked timed out
                self.state.update(|shared| shared.catalog.apply_latency(&[]));
                return Err(e.into());
            }
        };

        let summary = ProbeSummary {
            tested: targets.len(),
            reachable: results.iter().filter(|r| r.succeeded).count(),
        };
        self.state
            .update(|shared| shared.catalog.apply_latency(&results));
        self.state.activity.success(format!(
            "Latency test complete: {}/{} reachable",
            summary.reachable, summary.tested
        ));
        Ok(summary)
    }
}
