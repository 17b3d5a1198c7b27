use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::time::Duration;

use spool::concurrency::shared_use::{SharedUse, UseCounts};
use spool::error::{ErrorKind, SpoolResult};
use spool::resource::SharedArtifact;
use spool::spool_error;
use spool::test_utils::scratch::ScratchDir;
use spool_telemetry::tracing::init_test_tracing;

#[test]
fn rolled_back_first_use_is_taken_over_by_the_waiting_thread() {
    init_test_tracing();
    let coordinator = Arc::new(SharedUse::new());
    let (events_tx, events_rx) = mpsc::channel();

    // Thread A starts the first use.
    coordinator.begin_use().unwrap();

    // Thread B has to wait for A.
    let waiter = {
        let coordinator = coordinator.clone();
        let events_tx = events_tx.clone();
        std::thread::spawn(move || {
            coordinator.begin_use().unwrap();
            events_tx.send("b entered").unwrap();
            coordinator.complete_use();
        })
    };

    assert!(events_rx.recv_timeout(Duration::from_millis(100)).is_err());

    // A fails its materialization and rolls back, which makes B the first user.
    coordinator.rollback_use();
    assert_eq!(
        events_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        "b entered"
    );
    waiter.join().unwrap();

    // A later caller proceeds immediately.
    coordinator.begin_use().unwrap();
    assert_eq!(
        coordinator.counts(),
        UseCounts {
            started: 2,
            finished: 1
        }
    );
}

#[test]
fn concurrent_users_materialize_an_artifact_exactly_once() {
    init_test_tracing();
    let scratch = ScratchDir::new();
    let source = scratch.path().join("dataset.csv");
    std::fs::write(&source, "id\n1\n2\n3\n").unwrap();

    let artifact = Arc::new(SharedArtifact::new(&source));
    let derived = scratch.path().join("dataset.idx");
    let builds = Arc::new(AtomicUsize::new(0));
    let users = 8;
    let start = Arc::new(Barrier::new(users));

    let handles: Vec<_> = (0..users)
        .map(|_| {
            let artifact = artifact.clone();
            let derived = derived.clone();
            let builds = builds.clone();
            let start = start.clone();
            std::thread::spawn(move || {
                start.wait();
                artifact.with_use(|source| -> SpoolResult<usize> {
                    if !derived.exists() {
                        builds.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        let rows = std::fs::read_to_string(source)?.lines().count() - 1;
                        std::fs::write(&derived, rows.to_string())?;
                    }

                    Ok(std::fs::read_to_string(&derived)?.parse().unwrap_or_default())
                })
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 3);
    }

    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(
        artifact.coordinator().counts(),
        UseCounts {
            started: users as u64,
            finished: users as u64
        }
    );
}

#[test]
fn failed_materialization_lets_the_next_user_retry() {
    init_test_tracing();
    let scratch = ScratchDir::new();
    let source = scratch.path().join("dataset.csv");
    std::fs::write(&source, "id\n").unwrap();
    let artifact = SharedArtifact::new(&source);

    let err = artifact
        .with_use(|_| -> SpoolResult<()> {
            Err(spool_error!(ErrorKind::IoError, "Conversion failed"))
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoError);

    artifact.with_use(|_| -> SpoolResult<()> { Ok(()) }).unwrap();
    assert!(artifact.coordinator().is_materialized());

    std::fs::remove_file(&source).unwrap();
    assert_eq!(
        artifact.begin_use().unwrap_err().kind(),
        ErrorKind::ResourceGone
    );
}
