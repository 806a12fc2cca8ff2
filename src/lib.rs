//! lockprobe
//!
//! Verification harness for an exclusive lock shared by many cooperatively
//! scheduled tasks that cross a foreign-call boundary while waiting on it.
//!
//! # Protocol
//!
//! - The coordinator takes the lock, then spawns workers one at a time.
//! - Each worker signals that it started and makes a foreign call whose
//!   upcall blocks on the lock. The coordinator probes the worker's state
//!   until it is parked before spawning the next one.
//! - With every worker parked, the coordinator makes its own foreign call
//!   while holding the lock, then releases it.
//! - Each worker, once handed the lock, leaves the foreign call, bumps a
//!   shared counter and finishes. The run passes when the counter equals the
//!   worker count and the lock ends free.
//!
//! Lock ownership is keyed by logical task identity, so it is preserved
//! across the foreign boundary regardless of which thread runs the upcall.

pub mod cli;
pub mod config;
pub mod error;
pub mod foreign;
pub mod harness;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod telemetry;

pub use error::HarnessError;
pub use harness::{run_blocking, CarrierMode, Coordinator, HarnessConfig, RunReport, Verdict};
pub use task::{LogicalTask, TaskId, WorkerState};
