//! End-to-end tests for the coordinator protocol.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use lockprobe::harness::{
    run_blocking, CarrierMode, Coordinator, HarnessConfig, RunReport, Verdict,
};
use lockprobe::scheduler::{FaultKind, FaultPlan, ProbeConfig};
use lockprobe::{HarnessError, TaskId, WorkerState};

fn config(workers: usize) -> HarnessConfig {
    HarnessConfig {
        worker_count: workers,
        park_delay: Duration::from_micros(200),
        probe: ProbeConfig {
            timeout: Some(Duration::from_secs(5)),
            max_polls: None,
        },
        join_timeout: Duration::from_secs(10),
        fault: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn four_workers_pass() {
    let report = Coordinator::new(config(4)).run().await;

    assert_eq!(report.verdict, Verdict::Pass, "{}", report.diagnostics());
    assert_eq!(report.counter, 4);
    assert!(report.lock.free_at_end);
    assert_eq!(report.parked_before_release, 4);
    assert_eq!(report.peak_occupancy, 1);
    assert_eq!(report.lock.contended, 4);
    assert_eq!(report.lock.handoffs, 4);
    assert!(report
        .workers
        .iter()
        .all(|w| w.final_state == WorkerState::Done && w.error.is_none()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_workers_pass_trivially() {
    let report = Coordinator::new(config(0)).run().await;

    assert_eq!(report.verdict, Verdict::Pass, "{}", report.diagnostics());
    assert_eq!(report.counter, 0);
    assert!(report.workers.is_empty());
    assert!(report.lock.free_at_end);
    assert_eq!(report.lock.contended, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_exiting_before_park_is_a_liveness_failure() {
    let mut cfg = config(4);
    cfg.fault = Some(FaultPlan {
        worker: 3,
        kind: FaultKind::ExitBeforePark,
    });
    let report = Coordinator::new(cfg).run().await;

    assert_eq!(report.verdict, Verdict::Fail);
    assert!(report.counter <= 3);
    // Workers 1 and 2 parked before the fault and finish once released.
    assert_eq!(report.counter, 2);
    assert!(report.lock.free_at_end);

    match &report.failures[0] {
        HarnessError::LivenessFailure {
            task,
            expected,
            observed,
            ..
        } => {
            assert_eq!(*task, TaskId::worker(3));
            assert_eq!(*expected, WorkerState::Parked);
            assert_eq!(*observed, WorkerState::Aborted);
        }
        other => panic!("unexpected first failure: {other:?}"),
    }
    // Worker 3's failure is reported once, not again at join time.
    let about_3 = report
        .failures
        .iter()
        .filter(|f| f.task() == Some(TaskId::worker(3)))
        .count();
    assert_eq!(about_3, 1);
    // Worker 4 was never spawned.
    assert_eq!(report.workers.len(), 3);
    assert!(!report.check("workers_spawned").unwrap().passed);
}

fn exit_fault_at(worker: u32) -> HarnessConfig {
    let mut cfg = config(4);
    cfg.fault = Some(FaultPlan {
        worker,
        kind: FaultKind::ExitBeforePark,
    });
    cfg
}

#[test]
fn worker_exiting_before_park_fails_on_a_single_carrier() {
    let reports = run_blocking(CarrierMode::CurrentThread, &exit_fault_at(3), 1).unwrap();
    let report = &reports[0];

    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(report.counter, 2);
    assert!(report.lock.free_at_end);
    assert_eq!(report.workers.len(), 3);
    assert!(matches!(
        report.failures[0],
        HarnessError::LivenessFailure {
            expected: WorkerState::Parked,
            observed: WorkerState::Aborted,
            ..
        }
    ));
    assert_eq!(report.failures[0].task(), Some(TaskId::worker(3)));
}

fn stall_fault(probe: ProbeConfig) -> HarnessConfig {
    let mut cfg = config(3);
    cfg.probe = probe;
    cfg.fault = Some(FaultPlan {
        worker: 2,
        kind: FaultKind::StallBeforePark { millis: 400 },
    });
    cfg
}

/// Worker 2 never parks in time. Worker 1 must still be released and joined.
fn assert_stalled_worker_recovered(report: &RunReport, reason: &str) {
    assert_eq!(report.verdict, Verdict::Fail);
    match &report.failures[0] {
        HarnessError::LivenessFailure {
            task,
            expected,
            observed,
            reason: actual,
        } => {
            assert_eq!(*task, TaskId::worker(2));
            assert_eq!(*expected, WorkerState::Parked);
            assert_eq!(*observed, WorkerState::Started);
            assert!(actual.contains(reason), "{actual}");
        }
        other => panic!("unexpected first failure: {other:?}"),
    }

    assert_eq!(report.workers.len(), 2);
    assert_eq!(report.workers[0].final_state, WorkerState::Done);
    assert_eq!(report.workers[1].final_state, WorkerState::Aborted);
    // The stalled worker took the lock without parking and must not count.
    assert_eq!(report.counter, 1);
    assert!(!report.check("counter").unwrap().passed);
    assert!(report.lock.free_at_end);
    let about_2 = report
        .failures
        .iter()
        .filter(|f| f.task() == Some(TaskId::worker(2)))
        .count();
    assert_eq!(about_2, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn probe_timeout_releases_and_joins() {
    let cfg = stall_fault(ProbeConfig {
        timeout: Some(Duration::from_millis(100)),
        max_polls: None,
    });
    let report = Coordinator::new(cfg).run().await;
    assert_stalled_worker_recovered(&report, "timed out");
}

#[tokio::test]
async fn exhausted_poll_budget_releases_and_joins() {
    // The first worker stalls, so the budget only ever applies to it.
    let mut cfg = stall_fault(ProbeConfig {
        timeout: None,
        max_polls: Some(5),
    });
    cfg.fault = Some(FaultPlan {
        worker: 1,
        kind: FaultKind::StallBeforePark { millis: 200 },
    });
    let report = Coordinator::new(cfg).run().await;

    assert_eq!(report.verdict, Verdict::Fail);
    match &report.failures[0] {
        HarnessError::LivenessFailure {
            task,
            observed,
            reason,
            ..
        } => {
            assert_eq!(*task, TaskId::worker(1));
            assert_eq!(*observed, WorkerState::Started);
            assert!(reason.contains("poll budget"), "{reason}");
        }
        other => panic!("unexpected first failure: {other:?}"),
    }
    assert_eq!(report.workers.len(), 1);
    assert_eq!(report.workers[0].final_state, WorkerState::Aborted);
    assert_eq!(report.counter, 0);
    assert!(report.lock.free_at_end);
    assert_eq!(report.parked_before_release, 0);
}

#[test]
fn join_timeout_fails_the_run_and_returns() {
    let mut cfg = config(4);
    cfg.park_delay = Duration::from_millis(700);
    cfg.join_timeout = Duration::from_secs(1);

    let start = Instant::now();
    let reports = run_blocking(CarrierMode::MultiThread { carriers: 2 }, &cfg, 1).unwrap();
    let elapsed = start.elapsed();

    let report = &reports[0];
    assert_eq!(report.verdict, Verdict::Fail);
    assert!(
        report.failures.iter().any(|f| matches!(
            f,
            HarnessError::InvariantMismatch { invariant, actual, .. }
                if invariant == "workers_joined" && actual == "timed out"
        )),
        "{}",
        report.diagnostics()
    );
    assert!(report.counter < 4);
    // Detached workers still in the lock must not keep the runtime alive.
    assert!(elapsed < Duration::from_secs(20), "took {elapsed:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_worker_fails_the_run() {
    let mut cfg = config(3);
    cfg.fault = Some(FaultPlan {
        worker: 1,
        kind: FaultKind::PanicBeforePark,
    });
    let report = Coordinator::new(cfg).run().await;

    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(report.failures[0].task(), Some(TaskId::worker(1)));
    assert_eq!(report.counter, 0);
    assert_eq!(report.workers[0].final_state, WorkerState::Aborted);
    let aborted = report.check("workers_aborted").unwrap();
    assert_eq!(aborted.actual, "1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn counter_matches_worker_count() {
    for n in 1..=6 {
        let report = Coordinator::new(config(n)).run().await;
        assert_eq!(report.verdict, Verdict::Pass, "n={n}: {}", report.diagnostics());
        assert_eq!(report.counter, n);
    }
}

#[tokio::test]
async fn single_carrier_passes() {
    let report = Coordinator::new(config(5)).run().await;
    assert_eq!(report.verdict, Verdict::Pass, "{}", report.diagnostics());
    assert_eq!(report.counter, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn many_more_workers_than_carriers() {
    let report = Coordinator::new(config(32)).run().await;
    assert_eq!(report.verdict, Verdict::Pass, "{}", report.diagnostics());
    assert_eq!(report.counter, 32);
    assert_eq!(report.peak_occupancy, 1);
}

#[test]
fn repeated_runs_are_independent() {
    let reports = run_blocking(CarrierMode::MultiThread { carriers: 2 }, &config(3), 4).unwrap();

    assert_eq!(reports.len(), 4);
    let ids: HashSet<_> = reports.iter().map(|r| r.run_id).collect();
    assert_eq!(ids.len(), 4);
    for r in &reports {
        assert_eq!(r.verdict, Verdict::Pass, "{}", r.diagnostics());
        // A leaked counter would read 6, 9, ... on later runs.
        assert_eq!(r.counter, 3);
        // Coordinator takes it twice (outer + foreign re-entry), each worker once.
        assert_eq!(r.lock.acquisitions, 2 + 3);
        assert_eq!(r.mode.as_deref(), Some("multi_thread(2)"));
    }
}

#[test]
fn both_carrier_modes_pass() {
    for mode in [
        CarrierMode::MultiThread { carriers: 2 },
        CarrierMode::CurrentThread,
    ] {
        let reports = run_blocking(mode, &config(3), 1).unwrap();
        assert_eq!(reports[0].verdict, Verdict::Pass, "{mode}: {}", reports[0].diagnostics());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn report_serializes_to_json() {
    let report = Coordinator::new(config(2)).run().await;
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

    assert_eq!(json["verdict"], "PASS");
    assert_eq!(json["counter"], 2);
    assert_eq!(json["workers"][0]["task"], 1);
    assert_eq!(json["workers"][0]["final_state"], "done");
}
