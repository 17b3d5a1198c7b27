use std::collections::HashMap;
use std::error::Error;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use metrics::{counter, gauge};
use rand::Rng;
use spool_config::shared::WorkdirConfig;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, SpoolResult};
use crate::failpoints::{
    WORKDIR_ACQUIRE_BEFORE_MARKER, WORKDIR_REAP_BEFORE_DELETE, spool_fail_point,
};
use crate::metrics::{
    SPOOL_WORKDIR_DELETE_FAILURES_TOTAL, SPOOL_WORKDIR_HEARTBEATS_TOTAL,
    SPOOL_WORKDIRS_REAPED_TOTAL, SPOOL_WORKDIRS_REGISTERED,
};
use crate::workdir::loops::spawn_loops;
use crate::workdir::{
    Clock, DeleteOutcome, DirKey, LocalFs, ReapReport, SystemClock, Workdir, WorkdirFs,
};
use crate::{bail, spool_error};

/// Random directory names are drawn from `0000` to `9999`.
const RANDOM_NAME_SPACE: u32 = 10_000;

/// Timing and naming derived from [`WorkdirConfig`].
#[derive(Debug, Clone)]
pub(super) struct Settings {
    pub(super) heartbeat_interval: Duration,
    pub(super) stale_after: Duration,
    marker_file_name: String,
    max_name_attempts: u32,
}

impl From<&WorkdirConfig> for Settings {
    fn from(config: &WorkdirConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            stale_after: Duration::from_millis(config.stale_after_ms),
            marker_file_name: config.marker_file_name.clone(),
            max_name_attempts: config.max_name_attempts,
        }
    }
}

/// Registry contents, only touched under the registry mutex.
#[derive(Debug)]
struct RegistryState {
    root: PathBuf,
    root_key: DirKey,
    /// Bumped on every root change so loops started for an older root can retire.
    generation: u64,
    registered: HashMap<DirKey, PathBuf>,
}

impl RegistryState {
    fn publish_registered(&self) {
        gauge!(SPOOL_WORKDIRS_REGISTERED).set(self.registered.len() as f64);
    }
}

pub(super) struct Inner {
    state: Mutex<RegistryState>,
    fs: Arc<dyn WorkdirFs>,
    clock: Arc<dyn Clock>,
    pub(super) settings: Settings,
    pub(super) runtime: Handle,
    pub(super) shutdown_rx: ShutdownRx,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn marker_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.settings.marker_file_name)
    }

    /// Returns `true` once a loop started for `generation` has nothing left to do.
    pub(super) fn should_retire(&self, generation: u64) -> bool {
        let state = self.lock();
        state.registered.is_empty() && state.generation != generation
    }

    pub(super) fn heartbeat_once(&self) -> usize {
        let state = self.lock();
        let now = self.clock.now();
        let mut refreshed = 0;

        for dir in state.registered.values() {
            if !self.fs.exists(dir) {
                debug!(path = %dir.display(), "registered working directory vanished, skipping heartbeat");
                continue;
            }

            let marker = self.marker_path(dir);
            match self.fs.touch(&marker, now) {
                Ok(()) => refreshed += 1,
                Err(err) => {
                    warn!(path = %marker.display(), error = %err, "failed to refresh liveness marker");
                }
            }
        }

        counter!(SPOOL_WORKDIR_HEARTBEATS_TOTAL).increment(refreshed as u64);

        refreshed
    }

    pub(super) fn reap_once(&self, root: &Path) -> ReapReport {
        let mut report = ReapReport::default();

        if !self.fs.exists(root) {
            debug!(root = %root.display(), "working directory root does not exist, skipping reclamation");
            return report;
        }

        // Held for the whole pass so no candidate can be registered while it is being deleted.
        let state = self.lock();

        let candidates = match self.fs.child_dirs(root) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "failed to list working directory root");
                return report;
            }
        };

        let now = self.clock.now();
        for dir in candidates {
            report.scanned += 1;

            if state.registered.contains_key(&DirKey::new(&dir)) {
                continue;
            }

            let Some(age) = self.liveness_age(&dir, now) else {
                continue;
            };
            if age <= self.settings.stale_after {
                continue;
            }

            if let Err(err) = spool_fail_point(WORKDIR_REAP_BEFORE_DELETE) {
                warn!(path = %dir.display(), error = %err, "skipping stale working directory");
                report.failed += 1;
                continue;
            }

            info!(path = %dir.display(), age_secs = age.as_secs(), "reclaiming stale working directory");
            let outcome = self.delete_tree(&dir);
            if outcome.removed {
                report.reaped += 1;
                counter!(SPOOL_WORKDIRS_REAPED_TOTAL).increment(1);
            } else {
                report.failed += 1;
            }
        }

        report
    }

    /// Age of the directory's liveness marker, or of the directory itself without a marker.
    fn liveness_age(&self, dir: &Path, now: SystemTime) -> Option<Duration> {
        let mtime = match self.fs.modified(&self.marker_path(dir)) {
            Ok(mtime) => mtime,
            Err(_) => match self.fs.modified(dir) {
                Ok(mtime) => mtime,
                Err(err) => {
                    debug!(path = %dir.display(), error = %err, "cannot read working directory age");
                    return None;
                }
            },
        };

        // Markers from the future count as fresh.
        Some(now.duration_since(mtime).unwrap_or(Duration::ZERO))
    }

    /// Deletes every file below `dir`, then the tree itself. Failures are logged and counted.
    fn delete_tree(&self, dir: &Path) -> DeleteOutcome {
        let mut outcome = DeleteOutcome::default();

        match self.fs.files_recursive(dir) {
            Ok(files) => {
                for file in files {
                    if let Err(err) = self.fs.remove_file(&file) {
                        outcome.files_failed += 1;
                        counter!(SPOOL_WORKDIR_DELETE_FAILURES_TOTAL).increment(1);
                        debug!(path = %file.display(), error = %err, "could not delete file");
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound && !self.fs.exists(dir) => {
                outcome.removed = true;
                return outcome;
            }
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "failed to list working directory contents");
            }
        }

        match self.fs.remove_dir_all(dir) {
            Ok(()) => outcome.removed = true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => outcome.removed = true,
            Err(err) => {
                counter!(SPOOL_WORKDIR_DELETE_FAILURES_TOTAL).increment(1);
                warn!(
                    path = %dir.display(),
                    files_failed = outcome.files_failed,
                    error = %err,
                    "could not delete working directory, leaving it for reclamation"
                );
            }
        }

        outcome
    }

    fn create_random_dir(&self, root: &Path) -> SpoolResult<PathBuf> {
        self.fs.create_dir_all(root)?;

        let mut rng = rand::thread_rng();
        for _ in 0..self.settings.max_name_attempts {
            let candidate = root.join(format!("{:04}", rng.gen_range(0..RANDOM_NAME_SPACE)));
            match self.fs.create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        }

        bail!(
            ErrorKind::WorkdirNamesExhausted,
            "No free working directory name found",
            format!(
                "{} attempts under {}",
                self.settings.max_name_attempts,
                root.display()
            )
        );
    }

    fn write_marker(&self, dir: &Path) -> SpoolResult<()> {
        spool_fail_point(WORKDIR_ACQUIRE_BEFORE_MARKER)?;
        self.fs.touch(&self.marker_path(dir), self.clock.now())?;

        Ok(())
    }
}

/// Registry of working directories owned by this process.
///
/// Cloning is cheap and every clone shares the same registry. The background heartbeat and
/// reclamation loops stop on shutdown, once every clone is dropped, or after a root change once
/// no directory is registered anymore.
#[derive(Clone)]
pub struct WorkdirManager {
    inner: Arc<Inner>,
}

impl WorkdirManager {
    /// Starts a manager on the local filesystem and the system clock.
    ///
    /// Must be called from within a tokio runtime, which runs the background loops.
    pub fn start(config: &WorkdirConfig, shutdown_rx: ShutdownRx) -> SpoolResult<Self> {
        Self::start_with(
            config,
            Arc::new(LocalFs),
            Arc::new(SystemClock),
            shutdown_rx,
        )
    }

    /// Starts a manager with explicit filesystem and clock implementations.
    pub fn start_with(
        config: &WorkdirConfig,
        fs: Arc<dyn WorkdirFs>,
        clock: Arc<dyn Clock>,
        shutdown_rx: ShutdownRx,
    ) -> SpoolResult<Self> {
        config.validate()?;

        let runtime = Handle::try_current().map_err(|err| {
            spool_error!(
                ErrorKind::InvalidState,
                "Working directory manager requires a tokio runtime",
                source: err
            )
        })?;

        let root = config.root_or_default();
        let this = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RegistryState {
                    root_key: DirKey::new(&root),
                    root: root.clone(),
                    generation: 0,
                    registered: HashMap::new(),
                }),
                fs,
                clock,
                settings: Settings::from(config),
                runtime,
                shutdown_rx,
            }),
        };

        info!(
            root = %root.display(),
            heartbeat_interval_ms = config.heartbeat_interval_ms,
            stale_after_ms = config.stale_after_ms,
            "starting working directory manager"
        );
        spawn_loops(&this.inner, 0, root);

        Ok(this)
    }

    /// Creates and registers a working directory.
    ///
    /// With `explicit_path` the directory is created there if absent. Otherwise a fresh
    /// directory with a random four digit name is created under the root.
    ///
    /// Fails with [`ErrorKind::InvalidState`] after shutdown, since no heartbeat would keep the
    /// new directory alive.
    pub fn acquire(&self, explicit_path: Option<&Path>) -> SpoolResult<Workdir> {
        if self.inner.shutdown_rx.is_shutdown() {
            bail!(
                ErrorKind::InvalidState,
                "Working directory manager is shut down"
            );
        }

        let mut state = self.inner.lock();

        let path = match explicit_path {
            Some(path) => {
                if state.registered.contains_key(&DirKey::new(path)) {
                    bail!(
                        ErrorKind::InvalidState,
                        "Working directory is already registered",
                        path.display()
                    );
                }

                self.inner.fs.create_dir_all(path)?;
                path.to_path_buf()
            }
            None => {
                let root = state.root.clone();
                self.inner.create_random_dir(&root)?
            }
        };

        let workdir = Workdir::new(path);
        state
            .registered
            .insert(workdir.key().clone(), workdir.path().to_path_buf());
        state.publish_registered();
        drop(state);

        if let Err(err) = self.inner.write_marker(workdir.path()) {
            self.release(&workdir);
            return Err(err);
        }

        debug!(path = %workdir.path().display(), "working directory acquired");

        Ok(workdir)
    }

    /// Acquires a working directory and fills it with `payload`.
    ///
    /// If `payload` fails the directory is released and the failure is returned as
    /// [`ErrorKind::PayloadFailed`] with the original error as source.
    pub fn acquire_with_payload<F, E>(
        &self,
        explicit_path: Option<&Path>,
        payload: F,
    ) -> SpoolResult<Workdir>
    where
        F: FnOnce(&Path) -> Result<(), E>,
        E: Error + Send + Sync + 'static,
    {
        let workdir = self.acquire(explicit_path)?;

        if let Err(err) = payload(workdir.path()) {
            let outcome = self.release(&workdir);
            warn!(
                path = %workdir.path().display(),
                removed = outcome.removed,
                error = %err,
                "working directory payload failed"
            );

            return Err(spool_error!(
                ErrorKind::PayloadFailed,
                "Failed to materialize working directory payload",
                workdir.path().display(),
                source: err
            ));
        }

        Ok(workdir)
    }

    /// Acquires a working directory that is released when the lease is dropped.
    pub fn lease(&self, explicit_path: Option<&Path>) -> SpoolResult<WorkdirLease> {
        let workdir = self.acquire(explicit_path)?;

        Ok(WorkdirLease {
            manager: self.clone(),
            workdir: Some(workdir),
        })
    }

    /// Unregisters a working directory and deletes it as far as possible.
    ///
    /// Never fails: files that cannot be deleted stay behind and the directory is reclaimed
    /// by a later reaper tick once its marker is stale.
    pub fn release(&self, workdir: &Workdir) -> DeleteOutcome {
        {
            let mut state = self.inner.lock();
            if state.registered.remove(workdir.key()).is_none() {
                debug!(path = %workdir.path().display(), "releasing unregistered working directory");
            }
            state.publish_registered();
        }

        let outcome = self.inner.delete_tree(workdir.path());
        debug!(
            path = %workdir.path().display(),
            removed = outcome.removed,
            files_failed = outcome.files_failed,
            "working directory released"
        );

        outcome
    }

    /// Moves the root for new working directories.
    ///
    /// Does nothing if `root` names the current root. Otherwise a new pair of background loops
    /// starts for the new root; the old pair keeps running until no directory is registered.
    pub fn set_root(&self, root: impl Into<PathBuf>) {
        let root = root.into();
        let key = DirKey::new(&root);

        let generation = {
            let mut state = self.inner.lock();
            if state.root_key == key {
                return;
            }

            state.root = root.clone();
            state.root_key = key;
            state.generation += 1;
            state.generation
        };

        info!(root = %root.display(), generation, "working directory root changed");
        spawn_loops(&self.inner, generation, root);
    }

    /// Refreshes the marker of every registered directory that still exists.
    ///
    /// Returns the number of markers refreshed.
    pub fn heartbeat_once(&self) -> usize {
        self.inner.heartbeat_once()
    }

    /// Deletes every unregistered child directory of `root` whose marker is stale.
    pub fn reap_once(&self, root: &Path) -> ReapReport {
        self.inner.reap_once(root)
    }

    pub fn root(&self) -> PathBuf {
        self.inner.lock().root.clone()
    }

    /// Returns the paths of all registered directories.
    pub fn registered(&self) -> Vec<PathBuf> {
        self.inner.lock().registered.values().cloned().collect()
    }

    pub fn is_registered(&self, path: &Path) -> bool {
        self.inner.lock().registered.contains_key(&DirKey::new(path))
    }
}

impl std::fmt::Debug for WorkdirManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("WorkdirManager")
            .field("root", &state.root)
            .field("generation", &state.generation)
            .field("registered", &state.registered.len())
            .finish()
    }
}

/// A working directory released on drop.
#[derive(Debug)]
pub struct WorkdirLease {
    manager: WorkdirManager,
    workdir: Option<Workdir>,
}

impl WorkdirLease {
    pub fn workdir(&self) -> Option<&Workdir> {
        self.workdir.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.workdir.as_ref().map(Workdir::path)
    }

    /// Releases the directory now and returns how the deletion went.
    pub fn release(mut self) -> DeleteOutcome {
        self.workdir
            .take()
            .map(|workdir| self.manager.release(&workdir))
            .unwrap_or_default()
    }
}

impl Drop for WorkdirLease {
    fn drop(&mut self) {
        if let Some(workdir) = self.workdir.take() {
            self.manager.release(&workdir);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::*;
    use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
    use crate::test_utils::clock::{ManualClock, TokioClock};
    use crate::test_utils::fs::LockingFs;
    use crate::test_utils::scratch::ScratchDir;

    fn config(root: &Path) -> WorkdirConfig {
        WorkdirConfig {
            root: Some(root.to_path_buf()),
            ..Default::default()
        }
    }

    struct Fixture {
        scratch: ScratchDir,
        clock: Arc<ManualClock>,
        fs: Arc<LockingFs>,
        manager: WorkdirManager,
        shutdown_tx: ShutdownTx,
    }

    impl Fixture {
        fn new() -> Self {
            let scratch = ScratchDir::new();
            let clock = Arc::new(ManualClock::new());
            let fs = Arc::new(LockingFs::new());
            let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
            let manager = WorkdirManager::start_with(
                &config(scratch.path()),
                fs.clone(),
                clock.clone(),
                shutdown_rx,
            )
            .unwrap();

            Self {
                scratch,
                clock,
                fs,
                manager,
                shutdown_tx,
            }
        }

        fn root(&self) -> &Path {
            self.scratch.path()
        }

        fn marker_mtime(&self, dir: &Path) -> SystemTime {
            fs::metadata(dir.join("heartbeat"))
                .unwrap()
                .modified()
                .unwrap()
        }
    }

    #[tokio::test]
    async fn acquire_creates_registered_directory_with_marker() {
        let fixture = Fixture::new();

        let workdir = fixture.manager.acquire(None).unwrap();

        assert!(workdir.path().starts_with(fixture.root()));
        let name = workdir.path().file_name().unwrap().to_string_lossy();
        assert_eq!(name.len(), 4);
        assert!(name.chars().all(|c| c.is_ascii_digit()));
        assert!(fixture.manager.is_registered(workdir.path()));
        assert_eq!(fixture.marker_mtime(workdir.path()), fixture.clock.now());
        workdir.ensure_exists().unwrap();
    }

    #[tokio::test]
    async fn explicit_path_is_created_and_cannot_be_registered_twice() {
        let fixture = Fixture::new();
        let explicit = fixture.root().join("explicit").join("nested");

        let workdir = fixture.manager.acquire(Some(&explicit)).unwrap();
        assert_eq!(workdir.path(), explicit);
        assert!(explicit.join("heartbeat").exists());

        let err = fixture.manager.acquire(Some(&explicit)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn release_removes_registration_and_directory() {
        let fixture = Fixture::new();
        let workdir = fixture.manager.acquire(None).unwrap();
        fs::write(workdir.path().join("data.bin"), b"payload").unwrap();

        let outcome = fixture.manager.release(&workdir);

        assert_eq!(
            outcome,
            DeleteOutcome {
                files_failed: 0,
                removed: true
            }
        );
        assert!(!workdir.path().exists());
        assert!(fixture.manager.registered().is_empty());
        assert_eq!(
            workdir.ensure_exists().unwrap_err().kind(),
            ErrorKind::ResourceGone
        );
    }

    #[tokio::test]
    async fn release_with_locked_file_keeps_going_and_reaper_finishes_later() {
        let fixture = Fixture::new();
        let workdir = fixture.manager.acquire(None).unwrap();
        let locked = workdir.path().join("locked.bin");
        let other = workdir.path().join("other.bin");
        fs::write(&locked, b"locked").unwrap();
        fs::write(&other, b"other").unwrap();
        fixture.fs.lock(&locked);

        let outcome = fixture.manager.release(&workdir);

        assert_eq!(outcome.files_failed, 1);
        assert!(!outcome.removed);
        assert!(!fixture.manager.is_registered(workdir.path()));
        assert!(locked.exists());
        assert!(!other.exists());
        assert!(!workdir.path().join("heartbeat").exists());

        // Once the lock is gone and the directory went stale, the reaper finishes the job.
        fixture.fs.unlock(&locked);
        fixture.clock.advance(Duration::from_secs(3_600));
        let report = fixture.manager.reap_once(fixture.root());

        assert_eq!(report.reaped, 1);
        assert!(!workdir.path().exists());
    }

    #[tokio::test]
    async fn release_deletes_tree_when_walk_hits_vanished_subdirectory() {
        let fixture = Fixture::new();
        let workdir = fixture.manager.acquire(None).unwrap();
        fs::create_dir_all(workdir.path().join("nested")).unwrap();
        fs::write(workdir.path().join("nested/data.bin"), b"data").unwrap();
        fixture.fs.interrupt_walk(workdir.path());

        let outcome = fixture.manager.release(&workdir);

        assert!(outcome.removed);
        assert!(!workdir.path().exists());
    }

    #[tokio::test]
    async fn release_of_vanished_directory_counts_as_removed() {
        let fixture = Fixture::new();
        let workdir = fixture.manager.acquire(None).unwrap();
        fs::remove_dir_all(workdir.path()).unwrap();

        let outcome = fixture.manager.release(&workdir);

        assert_eq!(
            outcome,
            DeleteOutcome {
                files_failed: 0,
                removed: true
            }
        );
    }

    #[tokio::test]
    async fn registered_directories_are_never_reaped() {
        let fixture = Fixture::new();
        let workdir = fixture.manager.acquire(None).unwrap();

        fixture.clock.advance(Duration::from_secs(24 * 3_600));
        let report = fixture.manager.reap_once(fixture.root());

        assert_eq!(report.scanned, 1);
        assert_eq!(report.reaped, 0);
        assert!(workdir.path().exists());
    }

    #[tokio::test]
    async fn stale_unregistered_directories_are_reaped_and_fresh_ones_kept() {
        let fixture = Fixture::new();
        let stale = fixture.root().join("stale");
        let fresh = fixture.root().join("fresh");
        fs::create_dir_all(stale.join("sub")).unwrap();
        fs::write(stale.join("sub/file.txt"), b"x").unwrap();
        fs::create_dir_all(&fresh).unwrap();

        let start = fixture.clock.now();
        fixture.fs.touch(&stale.join("heartbeat"), start).unwrap();
        fixture
            .fs
            .touch(&fresh.join("heartbeat"), start + Duration::from_secs(100))
            .unwrap();

        // Exactly at the threshold a directory is still considered alive.
        fixture.clock.advance(Duration::from_secs(120));
        assert_eq!(fixture.manager.reap_once(fixture.root()).reaped, 0);

        fixture.clock.advance(Duration::from_secs(1));
        let report = fixture.manager.reap_once(fixture.root());

        assert_eq!(report.reaped, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn missing_root_is_skipped() {
        let fixture = Fixture::new();
        let missing = fixture.root().join("does-not-exist");

        assert_eq!(fixture.manager.reap_once(&missing), ReapReport::default());
    }

    #[tokio::test]
    async fn heartbeat_refreshes_registered_markers() {
        let fixture = Fixture::new();
        let workdir = fixture.manager.acquire(None).unwrap();

        fixture.clock.advance(Duration::from_secs(60));
        assert_eq!(fixture.manager.heartbeat_once(), 1);
        assert_eq!(fixture.marker_mtime(workdir.path()), fixture.clock.now());

        fs::remove_dir_all(workdir.path()).unwrap();
        assert_eq!(fixture.manager.heartbeat_once(), 0);
        assert!(!workdir.path().exists());
    }

    #[tokio::test]
    async fn failed_payload_releases_directory() {
        let fixture = Fixture::new();

        let err = fixture
            .manager
            .acquire_with_payload(None, |dir| {
                fs::write(dir.join("partial.bin"), b"partial")?;
                Err(io::Error::other("extraction failed"))
            })
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PayloadFailed);
        assert!(fixture.manager.registered().is_empty());
        assert!(fs::read_dir(fixture.root()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn lease_releases_on_drop() {
        let fixture = Fixture::new();

        let path = {
            let lease = fixture.manager.lease(None).unwrap();
            let path = lease.path().unwrap().to_path_buf();
            assert!(fixture.manager.is_registered(&path));
            path
        };

        assert!(!path.exists());
        assert!(fixture.manager.registered().is_empty());
    }

    #[tokio::test]
    async fn acquire_after_shutdown_is_rejected() {
        let fixture = Fixture::new();
        let held = fixture.manager.acquire(None).unwrap();

        fixture.shutdown_tx.shutdown();

        let err = fixture.manager.acquire(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(fixture.manager.registered(), vec![held.path().to_path_buf()]);

        // Directories acquired before shutdown can still be released.
        assert!(fixture.manager.release(&held).removed);
    }

    #[tokio::test]
    async fn names_exhausted_when_every_candidate_is_taken() {
        let scratch = ScratchDir::new();
        for i in 0..RANDOM_NAME_SPACE {
            fs::create_dir(scratch.path().join(format!("{i:04}"))).unwrap();
        }
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let config = WorkdirConfig {
            max_name_attempts: 5,
            ..config(scratch.path())
        };
        let manager = WorkdirManager::start(&config, shutdown_rx).unwrap();

        let err = manager.acquire(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WorkdirNamesExhausted);
        assert!(manager.registered().is_empty());
    }

    #[test]
    fn start_outside_runtime_fails() {
        let scratch = ScratchDir::new();
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let err = WorkdirManager::start(&config(scratch.path()), shutdown_rx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn set_root_to_equivalent_path_is_a_noop() {
        let fixture = Fixture::new();
        let same = PathBuf::from(format!(
            "{}{}",
            fixture.root().display(),
            std::path::MAIN_SEPARATOR
        ));

        fixture.manager.set_root(same);
        assert_eq!(fixture.manager.root(), fixture.root());

        let other = fixture.root().join("moved");
        fixture.manager.set_root(&other);
        assert_eq!(fixture.manager.root(), other);

        let workdir = fixture.manager.acquire(None).unwrap();
        assert!(workdir.path().starts_with(&other));
    }

    #[tokio::test(start_paused = true)]
    async fn background_loops_keep_live_directories_and_reclaim_orphans() {
        let scratch = ScratchDir::new();
        let clock = Arc::new(TokioClock::new());
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let config = WorkdirConfig {
            root: Some(scratch.path().to_path_buf()),
            heartbeat_interval_ms: 60_000,
            stale_after_ms: 120_000,
            ..Default::default()
        };
        let manager =
            WorkdirManager::start_with(&config, Arc::new(LocalFs), clock.clone(), shutdown_rx)
                .unwrap();

        let live = manager.acquire(None).unwrap();
        let orphan = scratch.path().join("orphan");
        fs::create_dir_all(&orphan).unwrap();
        LocalFs.touch(&orphan.join("heartbeat"), clock.now()).unwrap();

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(orphan.exists());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!orphan.exists());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(live.path().exists());
        assert!(manager.is_registered(live.path()));

        shutdown_tx.shutdown();
    }
}
