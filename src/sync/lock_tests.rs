//! Tests for the task-owned exclusive lock.

use std::sync::Arc;

use tokio_test::{assert_pending, assert_ready_err, assert_ready_ok, task};

use super::*;

fn started(ordinal: u32) -> LogicalTask {
    let t = LogicalTask::new(TaskId::worker(ordinal));
    t.state().advance(WorkerState::Started).unwrap();
    t
}

#[tokio::test]
async fn uncontended_acquire_takes_ownership() {
    let lock = ExclusiveLock::new();
    let w = started(1);

    lock.acquire(&w).await.unwrap();
    assert_eq!(lock.holder(), Some(w.id()));
    // No contention means no parking.
    assert_eq!(w.current_state(), WorkerState::Started);

    lock.release(&w).unwrap();
    assert!(lock.is_free());
}

#[tokio::test]
async fn holder_can_reenter() {
    let lock = ExclusiveLock::new();
    let coord = LogicalTask::coordinator();

    lock.acquire(&coord).await.unwrap();
    lock.acquire(&coord).await.unwrap();
    lock.release(&coord).unwrap();
    assert_eq!(lock.holder(), Some(TaskId::COORDINATOR));
    lock.release(&coord).unwrap();
    assert!(lock.is_free());
    assert_eq!(lock.stats().acquisitions, 2);
}

#[tokio::test]
async fn waiter_parks_until_release() {
    let lock = ExclusiveLock::new();
    let coord = LogicalTask::coordinator();
    let w = started(1);

    lock.acquire(&coord).await.unwrap();

    let mut pending = task::spawn(lock.acquire(&w));
    assert_pending!(pending.poll());
    assert_eq!(w.current_state(), WorkerState::Parked);
    assert_eq!(lock.waiting(), 1);

    lock.release(&coord).unwrap();
    assert!(pending.is_woken());
    assert_ready_ok!(pending.poll());

    assert_eq!(w.current_state(), WorkerState::RunningPostUnblock);
    assert_eq!(lock.holder(), Some(w.id()));
    assert_eq!(lock.stats().handoffs, 1);
}

#[tokio::test]
async fn handoff_is_fifo() {
    let lock = ExclusiveLock::new();
    let coord = LogicalTask::coordinator();
    let w1 = started(1);
    let w2 = started(2);

    lock.acquire(&coord).await.unwrap();
    let mut a1 = task::spawn(lock.acquire(&w1));
    let mut a2 = task::spawn(lock.acquire(&w2));
    assert_pending!(a1.poll());
    assert_pending!(a2.poll());

    lock.release(&coord).unwrap();
    assert_eq!(lock.holder(), Some(w1.id()));
    assert_pending!(a2.poll());
    assert_ready_ok!(a1.poll());

    lock.release(&w1).unwrap();
    assert_eq!(lock.holder(), Some(w2.id()));
    assert_ready_ok!(a2.poll());
}

#[tokio::test]
async fn dropped_waiter_is_skipped() {
    let lock = ExclusiveLock::new();
    let coord = LogicalTask::coordinator();
    let w1 = started(1);
    let w2 = started(2);

    lock.acquire(&coord).await.unwrap();
    let mut a1 = task::spawn(lock.acquire(&w1));
    let mut a2 = task::spawn(lock.acquire(&w2));
    assert_pending!(a1.poll());
    assert_pending!(a2.poll());
    drop(a1);

    lock.release(&coord).unwrap();
    assert_eq!(lock.holder(), Some(w2.id()));
    assert_ready_ok!(a2.poll());
}

#[tokio::test]
async fn aborted_waiter_passes_the_lock_on() {
    let lock = ExclusiveLock::new();
    let coord = LogicalTask::coordinator();
    let w1 = started(1);
    let w2 = started(2);

    lock.acquire(&coord).await.unwrap();
    let mut a1 = task::spawn(lock.acquire(&w1));
    let mut a2 = task::spawn(lock.acquire(&w2));
    assert_pending!(a1.poll());
    assert_pending!(a2.poll());

    // The waiter is aborted while parked, then handed the lock.
    assert!(w1.state().abort());
    lock.release(&coord).unwrap();
    assert_eq!(lock.holder(), Some(w1.id()));

    assert_ready_err!(a1.poll());
    assert_eq!(lock.holder(), Some(w2.id()));
    assert_ready_ok!(a2.poll());
    assert_eq!(w2.current_state(), WorkerState::RunningPostUnblock);

    lock.release(&w2).unwrap();
    assert!(lock.is_free());
    assert_eq!(lock.stats().handoffs, 2);
}

#[tokio::test]
async fn aborted_last_waiter_frees_the_lock() {
    let lock = ExclusiveLock::new();
    let coord = LogicalTask::coordinator();
    let w = started(1);

    lock.acquire(&coord).await.unwrap();
    let mut pending = task::spawn(lock.acquire(&w));
    assert_pending!(pending.poll());

    w.state().abort();
    lock.release(&coord).unwrap();
    let err = assert_ready_err!(pending.poll());
    assert!(matches!(err, HarnessError::ProtocolViolation { .. }));
    assert!(lock.is_free());
}

#[tokio::test]
async fn release_by_non_holder_is_rejected() {
    let lock = ExclusiveLock::new();
    let coord = LogicalTask::coordinator();
    let w = started(4);

    lock.acquire(&coord).await.unwrap();
    let err = lock.release(&w).unwrap_err();
    match err {
        HarnessError::ProtocolViolation { task, detail } => {
            assert_eq!(task, w.id());
            assert!(detail.contains("coordinator"), "{detail}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Lock state is untouched.
    assert_eq!(lock.holder(), Some(TaskId::COORDINATOR));
}

#[tokio::test]
async fn release_of_free_lock_is_rejected() {
    let lock = ExclusiveLock::new();
    let w = started(1);
    assert!(matches!(
        lock.release(&w),
        Err(HarnessError::ProtocolViolation { .. })
    ));
    assert!(lock.is_free());
}

#[tokio::test]
async fn waiter_that_cannot_park_is_not_queued() {
    let lock = ExclusiveLock::new();
    let coord = LogicalTask::coordinator();
    // Still in Created, so Created -> Parked is illegal.
    let w = LogicalTask::new(TaskId::worker(1));

    lock.acquire(&coord).await.unwrap();
    let err = lock.acquire(&w).await.unwrap_err();
    assert!(matches!(err, HarnessError::ProtocolViolation { .. }));
    assert_eq!(lock.waiting(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ownership_survives_a_thread_change() {
    let lock = Arc::new(ExclusiveLock::new());
    let coord = LogicalTask::coordinator();
    lock.acquire(&coord).await.unwrap();

    // Release from a different OS thread under the same logical identity.
    let lock2 = lock.clone();
    let coord2 = coord.clone();
    tokio::task::spawn_blocking(move || lock2.release(&coord2))
        .await
        .unwrap()
        .unwrap();
    assert!(lock.is_free());
}
