//! Lock-protocol harness: the coordinator, its report, and runtime setup.

mod coordinator;
mod report;
mod runtime;

pub use coordinator::{default_worker_count, Coordinator, HarnessConfig};
pub use report::{InvariantCheck, LockSummary, RunReport, Verdict};
pub use runtime::{build_runtime, run_blocking, CarrierMode};
