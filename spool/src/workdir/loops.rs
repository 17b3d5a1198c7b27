//! Background heartbeat and reclamation loops.
//!
//! Each root gets one heartbeat loop and one reaper loop. Both tick every heartbeat interval
//! and hold only a weak reference to the manager, so dropping the last manager handle ends
//! them at their next tick. Passes touch the filesystem and run on the blocking pool.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use crate::concurrency::shutdown::ShutdownRx;
use crate::workdir::manager::Inner;

pub(super) fn spawn_loops(inner: &Arc<Inner>, generation: u64, root: PathBuf) {
    let period = inner.settings.heartbeat_interval;

    inner.runtime.spawn(heartbeat_loop(
        Arc::downgrade(inner),
        generation,
        period,
        inner.shutdown_rx.clone(),
    ));
    inner.runtime.spawn(reaper_loop(
        Arc::downgrade(inner),
        generation,
        root,
        period,
        inner.shutdown_rx.clone(),
    ));
}

/// Outcome of one loop pass.
enum Pass<T> {
    Completed(T),
    Panicked,
    Stop,
}

/// Runs `pass` on the blocking pool unless the loop should stop.
///
/// The retire check takes the registry lock, which a reaper pass holds while deleting, so it
/// runs on the blocking pool as well.
async fn run_pass<T, F>(
    inner: &Weak<Inner>,
    generation: u64,
    loop_name: &'static str,
    pass: F,
) -> Pass<T>
where
    T: Send + 'static,
    F: FnOnce(&Inner) -> T + Send + 'static,
{
    let Some(inner) = inner.upgrade() else {
        debug!(loop_name, generation, "working directory manager dropped, stopping loop");
        return Pass::Stop;
    };

    let result = tokio::task::spawn_blocking(move || {
        if inner.should_retire(generation) {
            return None;
        }

        Some(pass(&inner))
    })
    .await;

    match result {
        Ok(Some(value)) => Pass::Completed(value),
        Ok(None) => {
            info!(loop_name, generation, "working directory root changed, stopping loop");
            Pass::Stop
        }
        Err(err) => {
            error!(loop_name, generation, error = %err, "working directory pass panicked");
            Pass::Panicked
        }
    }
}

async fn heartbeat_loop(
    inner: Weak<Inner>,
    generation: u64,
    period: Duration,
    mut shutdown_rx: ShutdownRx,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Markers are written on acquisition, the first refresh is due one period later.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.wait_for_shutdown() => {
                info!(generation, "heartbeat loop stopped due to shutdown");

                return;
            }

            _ = ticker.tick() => {
                match run_pass(&inner, generation, "heartbeat", Inner::heartbeat_once).await {
                    Pass::Completed(refreshed) => {
                        debug!(generation, refreshed, "refreshed working directory markers");
                    }
                    Pass::Panicked => {}
                    Pass::Stop => return,
                }
            }
        }
    }
}

async fn reaper_loop(
    inner: Weak<Inner>,
    generation: u64,
    root: PathBuf,
    period: Duration,
    mut shutdown_rx: ShutdownRx,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.wait_for_shutdown() => {
                info!(generation, root = %root.display(), "reaper loop stopped due to shutdown");

                return;
            }

            _ = ticker.tick() => {
                let pass_root = root.clone();
                let report = match run_pass(&inner, generation, "reaper", move |inner| inner.reap_once(&pass_root)).await {
                    Pass::Completed(report) => report,
                    Pass::Panicked => continue,
                    Pass::Stop => return,
                };

                if report.reaped > 0 || report.failed > 0 {
                    info!(
                        generation,
                        root = %root.display(),
                        scanned = report.scanned,
                        reaped = report.reaped,
                        failed = report.failed,
                        "reclaimed stale working directories"
                    );
                }
            }
        }
    }
}
