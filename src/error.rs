//! Harness error types.
//!
//! Every error is fatal to the run that raised it. Nothing is retried.

use serde::Serialize;
use thiserror::Error;

use crate::task::{TaskId, WorkerState};

/// Errors raised while driving the lock protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum HarnessError {
    /// A contract was broken: a non-holder released the lock, or a worker
    /// moved through its states out of order.
    #[error("Protocol violation by {task}: {detail}")]
    ProtocolViolation { task: TaskId, detail: String },

    /// A worker terminated, or stopped making progress, before reaching the
    /// state the coordinator was waiting for.
    #[error("Liveness failure on {task}: expected {expected}, last observed {observed} ({reason})")]
    LivenessFailure {
        task: TaskId,
        expected: WorkerState,
        observed: WorkerState,
        reason: String,
    },

    /// End-of-run state disagrees with what a correct run must produce.
    #[error("Invariant mismatch on {invariant}: expected {expected}, got {actual}")]
    InvariantMismatch {
        invariant: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to build scheduler: {0}")]
    Runtime(String),
}

impl HarnessError {
    pub(crate) fn violation(task: TaskId, detail: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            task,
            detail: detail.into(),
        }
    }

    pub(crate) fn mismatch(
        invariant: &str,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::InvariantMismatch {
            invariant: invariant.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Returns true if the run cannot continue after this error.
    ///
    /// Invariant mismatches are only detected at teardown, so they end the
    /// run by definition and are not treated as aborting it early.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvariantMismatch { .. })
    }

    /// The task this error is about, if it names one.
    pub fn task(&self) -> Option<TaskId> {
        match self {
            Self::ProtocolViolation { task, .. } | Self::LivenessFailure { task, .. } => {
                Some(*task)
            }
            _ => None,
        }
    }
}
