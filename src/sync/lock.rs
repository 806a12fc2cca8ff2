//! Exclusive lock owned by logical task identity.
//!
//! Ownership is recorded as a [`TaskId`], never as a thread, so a holder may
//! wander into a foreign execution context and come back still holding the
//! lock. The lock is reentrant for its holder and hands off to waiters in
//! FIFO order: `release` transfers ownership directly to the next waiter
//! instead of freeing the lock and letting waiters race for it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::HarnessError;
use crate::task::{LogicalTask, TaskId, WorkerState};

struct Waiter {
    task: TaskId,
    wake: oneshot::Sender<()>,
}

#[derive(Default)]
struct LockState {
    owner: Option<TaskId>,
    holds: u32,
    waiters: VecDeque<Waiter>,
}

/// Counters describing how the lock was used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Successful acquisitions, reentrant ones included.
    pub acquisitions: u64,
    /// Acquisitions that had to park behind another holder.
    pub contended: u64,
    /// Direct ownership transfers from a releasing holder to a waiter.
    pub handoffs: u64,
}

/// Single mutual-exclusion resource shared by the coordinator and workers.
pub struct ExclusiveLock {
    state: Mutex<LockState>,
    acquisitions: AtomicU64,
    contended: AtomicU64,
    handoffs: AtomicU64,
}

impl Default for ExclusiveLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ExclusiveLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            acquisitions: AtomicU64::new(0),
            contended: AtomicU64::new(0),
            handoffs: AtomicU64::new(0),
        }
    }

    /// Wait until `task` is the sole holder.
    ///
    /// A task that has to wait is moved to [`WorkerState::Parked`] before it
    /// becomes visible in the wait queue, and to
    /// [`WorkerState::RunningPostUnblock`] once ownership is handed to it.
    pub async fn acquire(&self, task: &LogicalTask) -> Result<(), HarnessError> {
        let id = task.id();
        let wake = {
            let mut state = self.state.lock();
            match state.owner {
                None => {
                    state.owner = Some(id);
                    state.holds = 1;
                    self.acquisitions.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Some(owner) if owner == id => {
                    state.holds += 1;
                    self.acquisitions.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Some(owner) => {
                    task.state().advance(WorkerState::Parked)?;
                    tracing::trace!(task = %id, holder = %owner, "parking on lock");
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(Waiter { task: id, wake: tx });
                    self.contended.fetch_add(1, Ordering::Relaxed);
                    rx
                }
            }
        };

        if wake.await.is_err() {
            return Err(HarnessError::violation(
                id,
                "lock dropped its waiter without handing off ownership",
            ));
        }
        // Ownership was assigned before the wakeup. A task that can no longer
        // run (aborted while parked) must pass it on before failing.
        if let Err(e) = task.state().advance(WorkerState::RunningPostUnblock) {
            let mut state = self.state.lock();
            if state.owner == Some(id) {
                tracing::debug!(task = %id, "woken waiter cannot run, passing the lock on");
                state.holds = 0;
                self.hand_off(&mut state, id);
            }
            return Err(e);
        }
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Give up one hold. When the last hold is released, ownership passes to
    /// the oldest live waiter, or the lock becomes free.
    ///
    /// Releasing a lock the caller does not hold is rejected without touching
    /// the lock.
    pub fn release(&self, task: &LogicalTask) -> Result<(), HarnessError> {
        let id = task.id();
        let mut state = self.state.lock();
        match state.owner {
            Some(owner) if owner == id => {}
            Some(owner) => {
                return Err(HarnessError::violation(
                    id,
                    format!("released a lock held by {owner}"),
                ));
            }
            None => {
                return Err(HarnessError::violation(id, "released a lock that is free"));
            }
        }

        state.holds -= 1;
        if state.holds > 0 {
            return Ok(());
        }

        self.hand_off(&mut state, id);
        Ok(())
    }

    /// Pass ownership from `from` to the oldest live waiter, or free the lock.
    fn hand_off(&self, state: &mut LockState, from: TaskId) {
        state.owner = None;
        while let Some(waiter) = state.waiters.pop_front() {
            // A waiter whose acquire future was dropped can no longer take
            // ownership; skip it.
            if waiter.wake.send(()).is_ok() {
                state.owner = Some(waiter.task);
                state.holds = 1;
                self.handoffs.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(from = %from, to = %waiter.task, "lock handed off");
                break;
            }
        }
    }

    pub fn is_free(&self) -> bool {
        self.state.lock().owner.is_none()
    }

    pub fn holder(&self) -> Option<TaskId> {
        self.state.lock().owner
    }

    /// Number of tasks currently queued behind the holder.
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub fn stats(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ExclusiveLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ExclusiveLock")
            .field("owner", &state.owner)
            .field("holds", &state.holds)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
