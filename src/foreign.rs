//! Foreign-call boundary.
//!
//! A foreign call leaves the managed scheduler: the closure runs on a
//! dedicated blocking thread that the tokio scheduler cannot see into, and any
//! async work it needs (taking the lock) is driven by a separate executor on
//! that thread. The calling task is suspended until the foreign code returns.
//!
//! Lock ownership is not tied to either side. The upcall names the logical
//! task explicitly, so a holder that crosses the boundary is still the holder
//! on the other side.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::HarnessError;
use crate::sync::ExclusiveLock;
use crate::task::{LogicalTask, TaskId};

/// Outcome of one foreign invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignOutcome {
    pub task: TaskId,
    /// How long the foreign code blocked its thread while inside the lock.
    pub blocked_for: Duration,
}

/// Tracks how many tasks are inside the lock-protected section at once.
#[derive(Debug, Default)]
pub struct OccupancyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl OccupancyGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> OccupancyGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        OccupancyGuard { gauge: self }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Highest occupancy seen so far. More than one means mutual exclusion
    /// was broken.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }
}

/// Leaves the protected section on drop.
pub struct OccupancyGuard<'a> {
    gauge: &'a OccupancyGauge,
}

impl Drop for OccupancyGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::AcqRel);
    }
}

/// What foreign code is allowed to do while it runs.
pub struct ForeignContext {
    task: LogicalTask,
    park_delay: Duration,
}

impl ForeignContext {
    pub fn task(&self) -> &LogicalTask {
        &self.task
    }

    /// Drive `fut` to completion on the foreign thread.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        futures::executor::block_on(fut)
    }

    /// Block the foreign thread for the configured park delay.
    pub fn park(&self) -> Duration {
        let start = Instant::now();
        std::thread::sleep(self.park_delay);
        start.elapsed()
    }
}

/// Capability to call into foreign code.
#[derive(Debug, Clone)]
pub struct ForeignBoundary {
    park_delay: Duration,
    gauge: Arc<OccupancyGauge>,
}

impl ForeignBoundary {
    pub fn new(park_delay: Duration) -> Self {
        Self {
            park_delay,
            gauge: Arc::new(OccupancyGauge::new()),
        }
    }

    pub fn gauge(&self) -> &Arc<OccupancyGauge> {
        &self.gauge
    }

    /// Run `upcall` in a foreign context on behalf of `task`.
    ///
    /// A panic inside the foreign code is resumed on the calling task.
    pub async fn call<F, T>(&self, task: &LogicalTask, upcall: F) -> Result<T, HarnessError>
    where
        F: FnOnce(&ForeignContext) -> Result<T, HarnessError> + Send + 'static,
        T: Send + 'static,
    {
        let ctx = ForeignContext {
            task: task.clone(),
            park_delay: self.park_delay,
        };
        match tokio::task::spawn_blocking(move || upcall(&ctx)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(HarnessError::violation(
                task.id(),
                format!("foreign call did not complete: {e}"),
            )),
        }
    }

    /// Foreign call whose upcall takes `lock`, blocks for the park delay
    /// while holding it, then releases it.
    pub async fn call_locked(
        &self,
        task: &LogicalTask,
        lock: Arc<ExclusiveLock>,
    ) -> Result<ForeignOutcome, HarnessError> {
        let gauge = self.gauge.clone();
        self.call(task, move |ctx| {
            let task = ctx.task();
            ctx.block_on(lock.acquire(task))?;
            let blocked_for = {
                let _inside = gauge.enter();
                ctx.park()
            };
            lock.release(task)?;
            Ok(ForeignOutcome {
                task: task.id(),
                blocked_for,
            })
        })
        .await
    }
}
