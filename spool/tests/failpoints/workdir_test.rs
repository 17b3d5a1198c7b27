use std::sync::Arc;
use std::time::Duration;

use fail::FailScenario;
use spool::concurrency::shutdown::create_shutdown_channel;
use spool::error::ErrorKind;
use spool::failpoints::{WORKDIR_ACQUIRE_BEFORE_MARKER, WORKDIR_REAP_BEFORE_DELETE};
use spool::test_utils::clock::ManualClock;
use spool::test_utils::scratch::ScratchDir;
use spool::workdir::{Clock, LocalFs, WorkdirFs, WorkdirManager};
use spool_config::shared::WorkdirConfig;
use spool_telemetry::tracing::init_test_tracing;

/// Configures fail points for the duration of a test and turns them off on drop.
struct ConfiguredFailpoints<'a> {
    _scenario: FailScenario<'a>,
    names: Vec<&'static str>,
}

impl ConfiguredFailpoints<'_> {
    fn setup(failpoints: &[(&'static str, &str)]) -> Self {
        let scenario = FailScenario::setup();
        for (name, action) in failpoints {
            fail::cfg(*name, action).unwrap();
        }

        Self {
            _scenario: scenario,
            names: failpoints.iter().map(|(name, _)| *name).collect(),
        }
    }
}

impl Drop for ConfiguredFailpoints<'_> {
    fn drop(&mut self) {
        for name in &self.names {
            fail::remove(name);
        }
    }
}

fn start_manager(scratch: &ScratchDir, clock: Arc<ManualClock>) -> WorkdirManager {
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let config = WorkdirConfig {
        root: Some(scratch.path().to_path_buf()),
        ..Default::default()
    };

    WorkdirManager::start_with(&config, Arc::new(LocalFs), clock, shutdown_rx).unwrap()
}

#[tokio::test]
async fn marker_failure_releases_the_new_directory() {
    init_test_tracing();
    let _failpoints = ConfiguredFailpoints::setup(&[(WORKDIR_ACQUIRE_BEFORE_MARKER, "return")]);
    let scratch = ScratchDir::new();
    let manager = start_manager(&scratch, Arc::new(ManualClock::new()));

    let err = manager.acquire(None).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::IoError);
    assert!(manager.registered().is_empty());
    assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn failed_reap_is_retried_on_the_next_pass() {
    init_test_tracing();
    let scratch = ScratchDir::new();
    let clock = Arc::new(ManualClock::new());
    let manager = start_manager(&scratch, clock.clone());

    let orphan = scratch.path().join("orphan");
    std::fs::create_dir_all(&orphan).unwrap();
    LocalFs.touch(&orphan.join("heartbeat"), clock.now()).unwrap();
    clock.advance(Duration::from_secs(300));

    {
        let _failpoints =
            ConfiguredFailpoints::setup(&[(WORKDIR_REAP_BEFORE_DELETE, "return(invalid_state)")]);
        let report = manager.reap_once(scratch.path());
        assert_eq!(report.failed, 1);
        assert!(orphan.exists());
    }

    let report = manager.reap_once(scratch.path());
    assert_eq!(report.reaped, 1);
    assert!(!orphan.exists());
}
