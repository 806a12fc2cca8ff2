//! Dedicated scheduler construction and blocking entry points.

use std::fmt;

use serde::Serialize;

use super::coordinator::{Coordinator, HarnessConfig};
use super::report::RunReport;
use crate::error::HarnessError;

/// Blocking threads a runtime keeps available regardless of worker count.
const MIN_BLOCKING_THREADS: usize = 512;

/// How lightweight tasks are multiplexed onto carrier threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierMode {
    /// Work-stealing scheduler over `carriers` OS threads.
    MultiThread { carriers: usize },
    /// Every task on the calling thread.
    CurrentThread,
}

impl CarrierMode {
    pub fn label(&self) -> String {
        match self {
            Self::MultiThread { carriers } => format!("multi_thread({carriers})"),
            Self::CurrentThread => "current_thread".to_string(),
        }
    }
}

impl fmt::Display for CarrierMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Build a runtime for `mode` with room for `workers` tasks parked in
/// foreign calls at once, plus the coordinator's own call.
pub fn build_runtime(mode: CarrierMode, workers: usize) -> Result<tokio::runtime::Runtime, HarnessError> {
    let mut builder = match mode {
        CarrierMode::MultiThread { carriers } => {
            let mut b = tokio::runtime::Builder::new_multi_thread();
            b.worker_threads(carriers.max(1));
            b
        }
        CarrierMode::CurrentThread => tokio::runtime::Builder::new_current_thread(),
    };
    builder
        .thread_name("lockprobe-carrier")
        .max_blocking_threads(MIN_BLOCKING_THREADS.max(workers + 2))
        .enable_time()
        .build()
        .map_err(|e| HarnessError::Runtime(e.to_string()))
}

/// Run the protocol `runs` times on a fresh runtime for `mode`.
///
/// Every run constructs its own lock and counter; runs share nothing but the
/// runtime.
pub fn run_blocking(
    mode: CarrierMode,
    config: &HarnessConfig,
    runs: usize,
) -> Result<Vec<RunReport>, HarnessError> {
    let runtime = build_runtime(mode, config.worker_count)?;
    let coordinator = Coordinator::new(config.clone());
    tracing::info!(%mode, runs, workers = config.worker_count, "starting runs");

    let reports = runtime.block_on(async {
        let mut reports = Vec::with_capacity(runs);
        for _ in 0..runs {
            let mut report = coordinator.run().await;
            report.mode = Some(mode.label());
            reports.push(report);
        }
        reports
    });
    // Workers left detached by a join timeout may still sit in foreign calls;
    // do not wait on their blocking threads forever.
    runtime.shutdown_timeout(config.join_timeout);
    Ok(reports)
}
