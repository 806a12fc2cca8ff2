//! Worker protocol: signal start, cross the foreign boundary into the lock,
//! count completion.
//!
//! Workers do not retry anything. A worker that leaves the protocol early, by
//! returning, erroring or panicking, is marked aborted on its way out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::HarnessError;
use crate::foreign::ForeignBoundary;
use crate::sync::ExclusiveLock;
use crate::task::{LogicalTask, StateCell, TaskId, WorkerState};

/// Deliberate misbehavior for exercising the failure paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Return right after signalling start, never reaching the lock.
    ExitBeforePark,
    /// Panic right after signalling start.
    PanicBeforePark,
    /// Sleep for `millis` after signalling start, then carry on.
    StallBeforePark { millis: u64 },
}

/// Which worker misbehaves, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaultPlan {
    pub worker: u32,
    pub kind: FaultKind,
}

impl FaultPlan {
    pub fn applies_to(&self, task: TaskId) -> bool {
        task.ordinal() == self.worker
    }
}

/// Everything a worker needs for one pass through the protocol.
pub(crate) struct WorkerContext {
    pub task: LogicalTask,
    pub lock: Arc<ExclusiveLock>,
    pub boundary: ForeignBoundary,
    pub counter: Arc<AtomicUsize>,
    pub started: oneshot::Sender<()>,
    pub fault: Option<FaultKind>,
}

/// Marks the task aborted when dropped before reaching `Done`.
struct AbortOnExit(Arc<StateCell>);

impl Drop for AbortOnExit {
    fn drop(&mut self) {
        if self.0.abort() {
            tracing::warn!(task = %self.0.task(), "worker left the protocol early");
        }
    }
}

pub(crate) async fn run(ctx: WorkerContext) -> Result<(), HarnessError> {
    let WorkerContext {
        task,
        lock,
        boundary,
        counter,
        started,
        fault,
    } = ctx;
    let _exit = AbortOnExit(task.state().clone());

    task.state().advance(WorkerState::Started)?;
    // The coordinator may already have given up on us; nothing to do then.
    let _ = started.send(());

    match fault {
        Some(FaultKind::ExitBeforePark) => {
            tracing::debug!(task = %task.id(), "injected fault: exiting before park");
            return Ok(());
        }
        Some(FaultKind::PanicBeforePark) => {
            panic!("injected fault: {} panicked before park", task.id());
        }
        Some(FaultKind::StallBeforePark { millis }) => {
            tracing::debug!(task = %task.id(), millis, "injected fault: stalling before park");
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
        None => {}
    }

    let outcome = boundary.call_locked(&task, lock).await?;
    // Only a worker that was handed the lock after parking counts.
    let state = task.current_state();
    if state != WorkerState::RunningPostUnblock {
        return Err(HarnessError::violation(
            task.id(),
            format!("left the lock in state {state} without having parked on it"),
        ));
    }
    counter.fetch_add(1, Ordering::SeqCst);
    task.state().advance(WorkerState::Done)?;

    tracing::debug!(
        task = %task.id(),
        blocked_us = outcome.blocked_for.as_micros() as u64,
        "worker done"
    );
    Ok(())
}
