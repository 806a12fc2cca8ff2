//! Coordinator: drives the full lock protocol and judges the outcome.
//!
//! Protocol, in order:
//!
//! 1. Take the lock.
//! 2. Spawn workers one at a time. For each, wait for its start signal, then
//!    probe until it is parked on the lock.
//! 3. With every worker parked, make one foreign call while still holding the
//!    lock (the call re-enters the lock from the foreign side).
//! 4. Release the lock, join every worker, check the invariants.
//!
//! Step 2 guarantees all workers are blocked on the same lock before any of
//! them may proceed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::Instrument;
use uuid::Uuid;

use super::report::{InvariantCheck, LockSummary, RunReport, Verdict};
use crate::error::HarnessError;
use crate::foreign::ForeignBoundary;
use crate::scheduler::{
    FaultPlan, JoinSummary, ProbeConfig, StateProbe, WorkerOutcome, WorkerPool,
};
use crate::sync::ExclusiveLock;
use crate::task::{LogicalTask, WorkerState};

const TERMINAL: &[WorkerState] = &[WorkerState::Done, WorkerState::Aborted];

/// Default worker count: every available CPU but one, which is left to the
/// coordinator.
pub fn default_worker_count() -> usize {
    num_cpus::get().saturating_sub(1)
}

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub worker_count: usize,
    /// How long each foreign call blocks while inside the lock.
    pub park_delay: Duration,
    pub probe: ProbeConfig,
    /// Upper bound on joining the workers once the lock is released.
    pub join_timeout: Duration,
    pub fault: Option<FaultPlan>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            park_delay: Duration::from_millis(1),
            probe: ProbeConfig::default(),
            join_timeout: Duration::from_secs(30),
            fault: None,
        }
    }
}

impl HarnessConfig {
    pub fn with_workers(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Default::default()
        }
    }
}

/// Runs the protocol. Every run builds its own lock and counter.
#[derive(Debug, Clone)]
pub struct Coordinator {
    config: HarnessConfig,
}

impl Coordinator {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Execute one run on the current tokio runtime.
    pub async fn run(&self) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "run",
            %run_id,
            workers = self.config.worker_count
        );
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> RunReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let n = self.config.worker_count;

        let lock = Arc::new(ExclusiveLock::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let boundary = ForeignBoundary::new(self.config.park_delay);
        let probe = StateProbe::new(self.config.probe);
        let mut pool = WorkerPool::new(lock.clone(), boundary.clone(), counter.clone())
            .with_fault(self.config.fault);

        let coord = LogicalTask::coordinator();
        let mut failures = Vec::new();
        let mut parked_before_release = 0;

        // Fresh lock and fresh coordinator task: neither step can fail.
        let _ = coord.state().advance(WorkerState::Started);
        if let Err(e) = lock.acquire(&coord).await {
            failures.push(e);
        }

        match start_workers(&mut pool, &probe, n).await {
            Ok(()) => {
                parked_before_release = count_parked(&pool);
                tracing::info!(parked = parked_before_release, "all workers parked");
                match boundary.call_locked(&coord, lock.clone()).await {
                    Ok(outcome) => tracing::debug!(
                        blocked_us = outcome.blocked_for.as_micros() as u64,
                        "coordinator foreign call returned"
                    ),
                    Err(e) => failures.push(e),
                }
            }
            Err(e) => {
                tracing::error!(error = %e, spawned = pool.len(), "startup aborted");
                parked_before_release = count_parked(&pool);
                failures.push(e);
            }
        }

        // Always release, even after a failed startup, so the workers that
        // did park can finish and be joined.
        if let Err(e) = lock.release(&coord) {
            failures.push(e);
        }

        let spawned = pool.len();
        let workers = self.join(pool, &mut failures).await;
        let counter = counter.load(Ordering::SeqCst);
        let done = workers
            .iter()
            .filter(|w| w.final_state == WorkerState::Done)
            .count();
        let aborted = workers
            .iter()
            .filter(|w| w.final_state == WorkerState::Aborted)
            .count();

        let checks = vec![
            InvariantCheck::equal("workers_spawned", n, spawned),
            InvariantCheck::equal("workers_done", n, done),
            InvariantCheck::equal("counter", n, counter),
            InvariantCheck::equal("workers_aborted", 0, aborted),
            InvariantCheck::equal("lock_free", true, lock.is_free()),
            InvariantCheck::at_most("peak_occupancy", 1, boundary.gauge().peak()),
            InvariantCheck::equal("parked_before_release", n, parked_before_release),
        ];

        let report = RunReport {
            run_id,
            started_at,
            mode: None,
            worker_count: n,
            counter,
            parked_before_release,
            peak_occupancy: boundary.gauge().peak(),
            lock: LockSummary::new(lock.is_free(), lock.stats()),
            workers,
            checks,
            failures,
            elapsed_ms: start.elapsed().as_millis() as u64,
            verdict: Verdict::Fail,
        }
        .finalize();

        metrics::counter!("lockprobe_runs_total", "verdict" => report.verdict.as_str())
            .increment(1);
        metrics::histogram!("lockprobe_run_duration_ms").record(report.elapsed_ms as f64);
        if report.verdict.is_pass() {
            tracing::info!(counter, elapsed_ms = report.elapsed_ms, "run passed");
        } else {
            tracing::warn!(
                failures = report.failures.len(),
                counter,
                "run failed"
            );
        }
        report
    }

    /// Join all workers, recording their errors. Errors about a worker that
    /// already has a recorded failure are not repeated.
    async fn join(&self, pool: WorkerPool, failures: &mut Vec<HarnessError>) -> Vec<WorkerOutcome> {
        let snapshot: Vec<_> = pool
            .workers()
            .iter()
            .map(|w| (w.id(), w.logical_task().clone()))
            .collect();

        let summary = match tokio::time::timeout(self.config.join_timeout, pool.join_all()).await {
            Ok(summary) => summary,
            Err(_) => {
                failures.push(HarnessError::mismatch(
                    "workers_joined",
                    format!("all within {:?}", self.config.join_timeout),
                    "timed out",
                ));
                // The stragglers are left detached; report what they showed.
                JoinSummary {
                    outcomes: snapshot
                        .into_iter()
                        .map(|(task, t)| WorkerOutcome {
                            task,
                            final_state: t.current_state(),
                            error: None,
                        })
                        .collect(),
                }
            }
        };

        for outcome in &summary.outcomes {
            let Some(err) = &outcome.error else { continue };
            let already = failures.iter().any(|f| f.task() == Some(outcome.task));
            if !already {
                failures.push(err.clone());
            }
        }
        summary.outcomes
    }
}

/// Spawn `n` workers, waiting for each to start and park before spawning the
/// next. Stops at the first worker that does not get there.
async fn start_workers(
    pool: &mut WorkerPool,
    probe: &StateProbe,
    n: usize,
) -> Result<(), HarnessError> {
    for _ in 0..n {
        pool.spawn().wait().await?;
        let Some(worker) = pool.workers().last() else {
            break;
        };
        let outcome = probe
            .await_state(worker, WorkerState::Parked, TERMINAL)
            .await?;
        tracing::debug!(task = %worker.id(), polls = outcome.polls, "worker parked");
    }
    Ok(())
}

fn count_parked(pool: &WorkerPool) -> usize {
    pool.workers()
        .iter()
        .filter(|w| w.state() == WorkerState::Parked)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reserves_one_cpu() {
        let cfg = HarnessConfig::default();
        assert_eq!(cfg.worker_count, num_cpus::get() - 1);
        assert!(cfg.fault.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_worker_run_passes() {
        let report = Coordinator::new(HarnessConfig::with_workers(1)).run().await;
        assert_eq!(report.verdict, Verdict::Pass, "{}", report.diagnostics());
        assert_eq!(report.lock.contended, 1);
        assert_eq!(report.lock.handoffs, 1);
    }
}
