//! Worker pool: spawns lightweight worker tasks and joins them.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::probe::StateSource;
use super::worker::{self, FaultPlan, WorkerContext};
use crate::error::HarnessError;
use crate::foreign::ForeignBoundary;
use crate::sync::ExclusiveLock;
use crate::task::{LogicalTask, TaskId, WorkerState};

/// Handle to one spawned worker.
pub struct WorkerHandle {
    task: LogicalTask,
    join: JoinHandle<Result<(), HarnessError>>,
}

impl WorkerHandle {
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn state(&self) -> WorkerState {
        self.task.current_state()
    }

    pub fn logical_task(&self) -> &LogicalTask {
        &self.task
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl StateSource for WorkerHandle {
    fn task(&self) -> TaskId {
        self.id()
    }

    fn observe(&self) -> WorkerState {
        self.state()
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Start signal of a freshly spawned worker.
pub struct StartSignal {
    task: LogicalTask,
    rx: oneshot::Receiver<()>,
}

impl StartSignal {
    /// Wait for the worker to report that it started.
    ///
    /// A worker that goes away without signalling is a liveness failure.
    pub async fn wait(self) -> Result<(), HarnessError> {
        self.rx.await.map_err(|_| HarnessError::LivenessFailure {
            task: self.task.id(),
            expected: WorkerState::Started,
            observed: self.task.current_state(),
            reason: "exited without signalling start".to_string(),
        })
    }
}

/// How one worker ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerOutcome {
    pub task: TaskId,
    pub final_state: WorkerState,
    pub error: Option<HarnessError>,
}

/// Result of joining every worker.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JoinSummary {
    pub outcomes: Vec<WorkerOutcome>,
}

impl JoinSummary {
    pub fn done(&self) -> usize {
        self.count(WorkerState::Done)
    }

    pub fn aborted(&self) -> usize {
        self.count(WorkerState::Aborted)
    }

    /// Errors in worker order.
    pub fn errors(&self) -> impl Iterator<Item = &HarnessError> {
        self.outcomes.iter().filter_map(|o| o.error.as_ref())
    }

    fn count(&self, state: WorkerState) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.final_state == state)
            .count()
    }
}

/// Spawns workers that contend for one shared lock.
pub struct WorkerPool {
    lock: Arc<ExclusiveLock>,
    boundary: ForeignBoundary,
    counter: Arc<AtomicUsize>,
    fault: Option<FaultPlan>,
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    pub fn new(
        lock: Arc<ExclusiveLock>,
        boundary: ForeignBoundary,
        counter: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            lock,
            boundary,
            counter,
            fault: None,
            workers: Vec::new(),
        }
    }

    pub fn with_fault(mut self, fault: Option<FaultPlan>) -> Self {
        self.fault = fault;
        self
    }

    /// Spawn the next worker on the current runtime.
    ///
    /// Workers are numbered from 1 in spawn order.
    pub fn spawn(&mut self) -> StartSignal {
        let ordinal = self.workers.len() as u32 + 1;
        let task = LogicalTask::new(TaskId::worker(ordinal));
        let (tx, rx) = oneshot::channel();
        let fault = self
            .fault
            .filter(|f| f.applies_to(task.id()))
            .map(|f| f.kind);

        let ctx = WorkerContext {
            task: task.clone(),
            lock: self.lock.clone(),
            boundary: self.boundary.clone(),
            counter: self.counter.clone(),
            started: tx,
            fault,
        };
        let join = tokio::spawn(worker::run(ctx));
        tracing::trace!(task = %task.id(), "worker spawned");

        self.workers.push(WorkerHandle {
            task: task.clone(),
            join,
        });
        StartSignal { task, rx }
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Wait for every worker to terminate.
    ///
    /// Never fails as a whole: each worker's fate is recorded in the summary,
    /// including workers that panicked or returned without finishing.
    pub async fn join_all(self) -> JoinSummary {
        let mut outcomes = Vec::with_capacity(self.workers.len());
        for handle in self.workers {
            let task = handle.id();
            let joined = handle.join.await;
            let final_state = handle.task.current_state();
            let error = match joined {
                Ok(Ok(())) if final_state == WorkerState::Done => None,
                Ok(Ok(())) => Some(HarnessError::LivenessFailure {
                    task,
                    expected: WorkerState::Done,
                    observed: final_state,
                    reason: "terminated without completing".to_string(),
                }),
                Ok(Err(e)) => Some(e),
                Err(e) => Some(HarnessError::LivenessFailure {
                    task,
                    expected: WorkerState::Done,
                    observed: final_state,
                    reason: if e.is_panic() {
                        "panicked".to_string()
                    } else {
                        format!("join failed: {e}")
                    },
                }),
            };
            outcomes.push(WorkerOutcome {
                task,
                final_state,
                error,
            });
        }
        JoinSummary { outcomes }
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
