//! Worker scheduling for the lock harness.
//!
//! Spawns workers on the ambient tokio runtime, probes their
//! scheduler-visible state, and joins them.

mod pool;
mod probe;
mod worker;

pub use pool::{JoinSummary, StartSignal, WorkerHandle, WorkerOutcome, WorkerPool};
pub use probe::{ProbeConfig, ProbeOutcome, StateProbe, StateSource};
pub use worker::{FaultKind, FaultPlan};
