//! Logical task identity and the scheduler-visible worker state machine.
//!
//! A task's identity is a plain ordinal. It is carried explicitly into every
//! lock operation, so ownership stays with the task no matter which OS thread
//! or executor happens to be running it.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::HarnessError;

/// Identity of a logical task. `0` is reserved for the coordinator; workers
/// are numbered from `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(u32);

impl TaskId {
    pub const COORDINATOR: TaskId = TaskId(0);

    /// Identity for the worker with the given 1-based ordinal.
    pub fn worker(ordinal: u32) -> Self {
        debug_assert!(ordinal > 0, "worker ordinals start at 1");
        Self(ordinal)
    }

    pub fn ordinal(self) -> u32 {
        self.0
    }

    pub fn is_coordinator(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_coordinator() {
            f.write_str("coordinator")
        } else {
            write!(f, "worker-{}", self.0)
        }
    }
}

/// Lifecycle of a worker as an outside observer sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerState {
    Created = 0,
    Started = 1,
    /// Blocked awaiting the lock, not runnable.
    Parked = 2,
    RunningPostUnblock = 3,
    Done = 4,
    Aborted = 5,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Started,
            2 => Self::Parked,
            3 => Self::RunningPostUnblock,
            4 => Self::Done,
            _ => Self::Aborted,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        match (self, next) {
            (Created, Started)
            | (Started, Parked)
            | (Parked, RunningPostUnblock)
            | (RunningPostUnblock, Done) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Parked => "parked",
            Self::RunningPostUnblock => "running_post_unblock",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Atomically updated state of one task, readable from any thread.
#[derive(Debug)]
pub struct StateCell {
    task: TaskId,
    raw: AtomicU8,
}

impl StateCell {
    pub fn new(task: TaskId) -> Self {
        Self {
            task,
            raw: AtomicU8::new(WorkerState::Created as u8),
        }
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn load(&self) -> WorkerState {
        WorkerState::from_u8(self.raw.load(Ordering::Acquire))
    }

    /// Move to `next`, rejecting edges the state machine does not have.
    ///
    /// Returns the previous state. On rejection the state is left unchanged.
    pub fn advance(&self, next: WorkerState) -> Result<WorkerState, HarnessError> {
        let mut current = self.raw.load(Ordering::Acquire);
        loop {
            let from = WorkerState::from_u8(current);
            if !from.can_transition_to(next) {
                return Err(HarnessError::violation(
                    self.task,
                    format!("illegal state transition {from} -> {next}"),
                ));
            }
            match self.raw.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(from),
                Err(actual) => current = actual,
            }
        }
    }

    /// Mark the task aborted unless it already reached a terminal state.
    ///
    /// Returns true if this call performed the transition.
    pub fn abort(&self) -> bool {
        self.advance(WorkerState::Aborted).is_ok()
    }
}

/// A logical task: an identity plus its observable state.
///
/// Cloning shares the same state cell.
#[derive(Debug, Clone)]
pub struct LogicalTask {
    id: TaskId,
    state: Arc<StateCell>,
}

impl LogicalTask {
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            state: Arc::new(StateCell::new(id)),
        }
    }

    pub fn coordinator() -> Self {
        Self::new(TaskId::COORDINATOR)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> &Arc<StateCell> {
        &self.state
    }

    pub fn current_state(&self) -> WorkerState {
        self.state.load()
    }
}
