//! Tests for driver election, submission batching, and panic isolation.

use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use super::yield_point::BlockingYield;
use super::SchedulerDriver;
use crate::engine::testing::{StubEngine, StubStats};
use crate::error::Error;
use crate::group::TransferGroup;
use crate::transfer::{Transfer, TransferOutcome};

fn stub_driver(script: Vec<usize>, window: Duration) -> (SchedulerDriver, Arc<StubStats>) {
    let engine = StubEngine::with_script(script);
    let stats = engine.stats();
    let group = TransferGroup::with_engine(Box::new(engine));
    let driver = SchedulerDriver::with_options(group, Box::new(BlockingYield), window);
    (driver, stats)
}

#[test]
fn perform_completes_a_single_transfer() {
    let (driver, _stats) = stub_driver(vec![1], Duration::from_millis(1));
    let t = Transfer::with_url("http://example.com/");
    driver.perform(&t).unwrap();
    assert_eq!(
        t.outcome(),
        Some(TransferOutcome::Success { response_code: 200 })
    );
    assert!(!driver.is_driving());
    assert!(
        !driver.batch_deadline_set(),
        "batching window resets once queue and active count drain"
    );
}

#[test]
fn submissions_within_the_window_share_one_drive_pass() {
    let (driver, stats) = stub_driver(vec![1], Duration::from_millis(200));
    let mut handles = Vec::new();
    for i in 0..2 {
        let driver = driver.clone();
        handles.push(thread::spawn(move || {
            let t = Transfer::with_url(&format!("http://example.com/{}", i));
            driver.perform(&t).unwrap();
            t
        }));
    }
    for h in handles {
        let t = h.join().unwrap();
        assert!(t.outcome().unwrap().is_success());
    }
    // Both transfers were attached before the first completion fired.
    assert_eq!(stats.peak_active.load(Ordering::SeqCst), 2);
}

#[test]
fn many_callers_share_one_driver_without_overlapping_drives() {
    // The drive delay makes overlapping drivers observable in the stats.
    let engine = StubEngine::with_script(vec![1]).drive_delay(Duration::from_millis(1));
    let stats = engine.stats();
    let group = TransferGroup::with_engine(Box::new(engine));
    let driver =
        SchedulerDriver::with_options(group, Box::new(BlockingYield), Duration::from_millis(5));

    let mut handles = Vec::new();
    for i in 0..8 {
        let driver = driver.clone();
        handles.push(thread::spawn(move || {
            let t = Transfer::with_url(&format!("http://example.com/{}", i));
            driver.perform(&t).map(|_| t)
        }));
    }
    for h in handles {
        let t = h.join().unwrap().unwrap();
        assert!(t.outcome().unwrap().is_success());
    }
    assert_eq!(
        stats.max_concurrent_drives.load(Ordering::SeqCst),
        1,
        "at most one caller may ever be driving"
    );
    assert_eq!(stats.adds.load(Ordering::SeqCst), 8);
}

#[test]
fn callback_panic_of_one_caller_does_not_strand_another() {
    let (driver, _stats) = stub_driver(vec![1], Duration::from_millis(100));

    let bad_driver = driver.clone();
    let bad = thread::spawn(move || {
        let t = Transfer::with_url("http://example.com/bad");
        t.on_complete(|_| panic!("observer bug"));
        bad_driver.perform(&t)
    });
    let good_driver = driver.clone();
    let good = thread::spawn(move || {
        let t = Transfer::with_url("http://example.com/good");
        good_driver.perform(&t).map(|_| t)
    });

    match bad.join().unwrap() {
        Err(Error::Callback(msg)) => assert!(msg.contains("observer bug")),
        other => panic!("expected callback error, got {:?}", other),
    }
    let good = good.join().unwrap().unwrap();
    assert!(good.outcome().unwrap().is_success());
    assert!(driver.group().is_idle());
}

#[test]
fn perform_raises_engine_failure_without_failure_callback() {
    let engine = StubEngine::new().outcomes(|_| TransferOutcome::Failure {
        code: 6,
        message: "could not resolve host".into(),
    });
    let group = TransferGroup::with_engine(Box::new(engine));
    let driver =
        SchedulerDriver::with_options(group, Box::new(BlockingYield), Duration::from_millis(1));

    let t = Transfer::with_url("http://no-such-host.invalid/");
    match driver.perform(&t) {
        Err(Error::Engine { code, .. }) => assert_eq!(code, 6),
        other => panic!("expected engine error, got {:?}", other),
    }

    let suppressed = Transfer::with_url("http://no-such-host.invalid/");
    suppressed.on_failure(|_| {});
    driver.perform(&suppressed).unwrap();
}

#[test]
fn sequential_performs_reuse_the_driver() {
    let (driver, stats) = stub_driver(vec![1], Duration::from_millis(1));
    for i in 0..3 {
        let t = Transfer::with_url(&format!("http://example.com/seq/{}", i));
        driver.perform(&t).unwrap();
    }
    assert_eq!(stats.adds.load(Ordering::SeqCst), 3);
    assert!(!driver.batch_deadline_set());
}

#[test]
fn current_returns_one_instance_per_thread() {
    let a = SchedulerDriver::current().unwrap();
    let b = SchedulerDriver::current().unwrap();
    assert!(Arc::ptr_eq(&a.shared, &b.shared));

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        tx.send(SchedulerDriver::current().unwrap()).unwrap();
    })
    .join()
    .unwrap();
    let other = rx.recv().unwrap();
    assert!(
        !Arc::ptr_eq(&a.shared, &other.shared),
        "drivers are never shared across threads implicitly"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn perform_works_from_a_tokio_host_via_blocking_tasks() {
    let (driver, _stats) = stub_driver(vec![1], Duration::from_millis(10));
    let mut joins = Vec::new();
    for i in 0..4 {
        let driver = driver.clone();
        joins.push(tokio::task::spawn_blocking(move || {
            let t = Transfer::with_url(&format!("http://example.com/task/{}", i));
            driver.perform(&t).map(|_| t)
        }));
    }
    for join in joins {
        let t = join.await.unwrap().unwrap();
        assert!(t.outcome().unwrap().is_success());
    }
    assert!(driver.group().is_idle());
}
