//! Structured outcome of one harness run.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::HarnessError;
use crate::scheduler::WorkerOutcome;
use crate::sync::LockStats;

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }

    pub fn is_pass(self) -> bool {
        self == Self::Pass
    }
}

/// One end-of-run invariant and what was observed for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantCheck {
    pub name: &'static str,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
}

impl InvariantCheck {
    pub fn equal<T: PartialEq + ToString>(name: &'static str, expected: T, actual: T) -> Self {
        Self {
            name,
            passed: expected == actual,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn at_most(name: &'static str, limit: usize, actual: usize) -> Self {
        Self {
            name,
            passed: actual <= limit,
            expected: format!("<= {limit}"),
            actual: actual.to_string(),
        }
    }

    fn to_error(&self) -> HarnessError {
        HarnessError::mismatch(self.name, &self.expected, &self.actual)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LockSummary {
    pub free_at_end: bool,
    pub acquisitions: u64,
    pub contended: u64,
    pub handoffs: u64,
}

impl LockSummary {
    pub fn new(free_at_end: bool, stats: LockStats) -> Self {
        Self {
            free_at_end,
            acquisitions: stats.acquisitions,
            contended: stats.contended,
            handoffs: stats.handoffs,
        }
    }
}

/// Everything a caller needs to judge and diagnose a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Scheduler flavor the run executed under, when known.
    pub mode: Option<String>,
    pub worker_count: usize,
    pub counter: usize,
    /// Workers observed parked when the coordinator made its own foreign call.
    pub parked_before_release: usize,
    pub peak_occupancy: usize,
    pub lock: LockSummary,
    pub workers: Vec<WorkerOutcome>,
    pub checks: Vec<InvariantCheck>,
    pub failures: Vec<HarnessError>,
    pub elapsed_ms: u64,
    pub verdict: Verdict,
}

impl RunReport {
    /// Fold failed checks into `failures` and settle the verdict.
    pub(crate) fn finalize(mut self) -> Self {
        let mismatches: Vec<_> = self
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(InvariantCheck::to_error)
            .collect();
        self.failures.extend(mismatches);
        self.verdict = if self.failures.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail
        };
        self
    }

    pub fn check(&self, name: &str) -> Option<&InvariantCheck> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{} run={} mode={} workers={} counter={} lock_free={} peak_occupancy={} elapsed={}ms",
            self.verdict.as_str(),
            self.run_id,
            self.mode.as_deref().unwrap_or("ambient"),
            self.worker_count,
            self.counter,
            self.lock.free_at_end,
            self.peak_occupancy,
            self.elapsed_ms,
        )
    }

    /// All failures as a single message, empty on success.
    pub fn diagnostics(&self) -> String {
        let mut out = String::new();
        for (i, failure) in self.failures.iter().enumerate() {
            let _ = writeln!(out, "  {}. {}", i + 1, failure);
        }
        out
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
