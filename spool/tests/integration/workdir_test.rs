use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use spool::concurrency::shutdown::{ShutdownRx, create_shutdown_channel};
use spool::test_utils::clock::TokioClock;
use spool::test_utils::scratch::ScratchDir;
use spool::test_utils::wait::wait_until;
use spool::workdir::{Clock, LocalFs, WorkdirFs, WorkdirManager};
use spool_config::shared::WorkdirConfig;
use spool_telemetry::tracing::init_test_tracing;

fn start_manager(
    root: &Path,
    clock: &Arc<TokioClock>,
    shutdown_rx: ShutdownRx,
) -> WorkdirManager {
    let config = WorkdirConfig {
        root: Some(root.to_path_buf()),
        heartbeat_interval_ms: 60_000,
        stale_after_ms: 120_000,
        ..Default::default()
    };

    WorkdirManager::start_with(&config, Arc::new(LocalFs), clock.clone(), shutdown_rx).unwrap()
}

#[tokio::test(start_paused = true)]
async fn directory_abandoned_by_crashed_owner_is_reclaimed() {
    init_test_tracing();
    let scratch = ScratchDir::new();
    let clock = Arc::new(TokioClock::new());

    // A process that dies without releasing its directory.
    let (crashed_shutdown_tx, crashed_shutdown_rx) = create_shutdown_channel();
    let crashed = start_manager(scratch.path(), &clock, crashed_shutdown_rx);
    let abandoned = crashed.acquire(None).unwrap();
    crashed_shutdown_tx.shutdown();
    drop(crashed);

    // The surviving process keeps its own directory alive.
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let survivor = start_manager(scratch.path(), &clock, shutdown_rx);
    let live = survivor.acquire(None).unwrap();

    tokio::time::sleep(Duration::from_secs(121)).await;
    assert!(abandoned.path().exists());

    let reclaimed = wait_until(Duration::from_secs(60), || !abandoned.path().exists()).await;
    assert!(reclaimed);
    assert!(live.path().exists());

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(live.path().exists());

    survivor.release(&live);
    assert!(!live.path().exists());
    shutdown_tx.shutdown();
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_reclamation() {
    init_test_tracing();
    let scratch = ScratchDir::new();
    let clock = Arc::new(TokioClock::new());
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let _manager = start_manager(scratch.path(), &clock, shutdown_rx);

    let orphan = scratch.path().join("orphan");
    std::fs::create_dir_all(&orphan).unwrap();
    LocalFs.touch(&orphan.join("heartbeat"), clock.now()).unwrap();

    shutdown_tx.shutdown();
    tokio::time::sleep(Duration::from_secs(600)).await;

    assert!(orphan.exists());
}

#[tokio::test(start_paused = true)]
async fn moved_root_is_still_reclaimed_while_old_directories_live() {
    init_test_tracing();
    let scratch = ScratchDir::new();
    let first_root = scratch.path().join("first");
    let second_root = scratch.path().join("second");
    let clock = Arc::new(TokioClock::new());
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let manager = start_manager(&first_root, &clock, shutdown_rx);

    let old = manager.acquire(None).unwrap();
    manager.set_root(&second_root);
    let new = manager.acquire(None).unwrap();
    assert!(old.path().starts_with(&first_root));
    assert!(new.path().starts_with(&second_root));

    let orphan = second_root.join("orphan");
    std::fs::create_dir_all(&orphan).unwrap();
    LocalFs.touch(&orphan.join("heartbeat"), clock.now()).unwrap();

    tokio::time::sleep(Duration::from_secs(181)).await;

    assert!(!orphan.exists());
    assert!(old.path().exists());
    assert!(new.path().exists());

    manager.release(&old);
    manager.release(&new);
    assert!(manager.registered().is_empty());
    shutdown_tx.shutdown();
}
