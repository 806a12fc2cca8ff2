//! Scheduler-state probe.
//!
//! Waits for a task to reach a given state by polling it and yielding the
//! calling task between polls. No blocking primitive is involved, so the
//! probe itself never parks; it is bounded by a deadline and/or a poll budget
//! instead, which turn a would-be hang into a reported liveness failure.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::HarnessError;
use crate::task::{StateCell, TaskId, WorkerState};

/// Anything whose scheduler-visible state can be observed.
pub trait StateSource {
    fn task(&self) -> TaskId;
    fn observe(&self) -> WorkerState;
}

impl StateSource for StateCell {
    fn task(&self) -> TaskId {
        StateCell::task(self)
    }

    fn observe(&self) -> WorkerState {
        self.load()
    }
}

/// Bounds on a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Wall-clock bound. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Poll-count bound. `None` polls indefinitely.
    pub max_polls: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(10)),
            max_polls: None,
        }
    }
}

/// Result of a successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub polls: u64,
    pub waited: Duration,
}

/// Polls tasks until they reach a target state.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateProbe {
    config: ProbeConfig,
}

impl StateProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ProbeConfig {
        self.config
    }

    /// Wait until `source` is in `target`.
    ///
    /// Fails with [`HarnessError::LivenessFailure`] if a state in `terminal`
    /// is observed first, or if the probe runs out of time or polls.
    pub async fn await_state<S>(
        &self,
        source: &S,
        target: WorkerState,
        terminal: &[WorkerState],
    ) -> Result<ProbeOutcome, HarnessError>
    where
        S: StateSource + ?Sized,
    {
        let start = Instant::now();
        let deadline = self.config.timeout.map(|t| start + t);
        let mut polls: u64 = 0;

        loop {
            let observed = source.observe();
            polls += 1;

            if observed == target {
                metrics::histogram!("lockprobe_probe_polls").record(polls as f64);
                return Ok(ProbeOutcome {
                    polls,
                    waited: start.elapsed(),
                });
            }
            if terminal.contains(&observed) {
                return Err(liveness(source, target, observed, "reached a terminal state"));
            }
            if self.config.max_polls.is_some_and(|max| polls >= max) {
                return Err(liveness(
                    source,
                    target,
                    observed,
                    &format!("poll budget of {polls} exhausted"),
                ));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(liveness(
                    source,
                    target,
                    observed,
                    &format!("timed out after {:?}", start.elapsed()),
                ));
            }

            tokio::task::yield_now().await;
        }
    }
}

fn liveness<S: StateSource + ?Sized>(
    source: &S,
    expected: WorkerState,
    observed: WorkerState,
    reason: &str,
) -> HarnessError {
    tracing::warn!(
        task = %source.task(),
        expected = %expected,
        observed = %observed,
        reason,
        "probe failed"
    );
    HarnessError::LivenessFailure {
        task: source.task(),
        expected,
        observed,
        reason: reason.to_string(),
    }
}
