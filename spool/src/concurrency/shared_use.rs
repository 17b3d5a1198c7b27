//! Build-once, reuse-many coordination for a shared resource.
//!
//! The first caller of [`SharedUse::begin_use`] materializes the resource (for example extracts
//! or converts it) while later callers wait. Once any use completes, every subsequent caller
//! proceeds without waiting. If the first use rolls back instead, one waiter is released to
//! become the new first user.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::counter;
use spool_config::shared::SharedUseConfig;
use tracing::{debug, warn};

use crate::bail;
use crate::error::{ErrorKind, SpoolResult};
use crate::metrics::{SPOOL_SHARED_USE_ROLLBACKS_TOTAL, SPOOL_SHARED_USE_WAITS_TOTAL};

/// Snapshot of the use counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UseCounts {
    /// Uses begun and not rolled back.
    pub started: u64,
    /// Uses completed.
    pub finished: u64,
}

impl UseCounts {
    /// A caller must wait while a first use is in flight and nothing completed yet.
    fn must_wait(&self) -> bool {
        self.started > 0 && self.finished == 0
    }
}

/// Coordinates concurrent use of one shared resource.
#[derive(Debug, Default)]
pub struct SharedUse {
    counts: Mutex<UseCounts>,
    changed: Condvar,
    wait_timeout: Option<Duration>,
}

impl SharedUse {
    /// Creates a coordinator whose callers wait indefinitely for the first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a coordinator from a configuration section.
    pub fn with_config(config: &SharedUseConfig) -> SpoolResult<Self> {
        config.validate()?;

        Ok(Self {
            wait_timeout: config.wait_timeout_ms.map(Duration::from_millis),
            ..Self::default()
        })
    }

    /// Creates a coordinator whose callers give up after `wait_timeout`.
    pub fn with_wait_timeout(wait_timeout: Duration) -> Self {
        Self {
            wait_timeout: Some(wait_timeout),
            ..Self::default()
        }
    }

    /// Registers a use, blocking while another caller's first use is unresolved.
    ///
    /// Every successful call must be matched by exactly one [`SharedUse::complete_use`] or
    /// [`SharedUse::rollback_use`]. Prefer [`SharedUse::enter`], which enforces that.
    pub fn begin_use(&self) -> SpoolResult<()> {
        let mut counts = self.lock();

        if counts.must_wait() {
            counter!(SPOOL_SHARED_USE_WAITS_TOTAL).increment(1);
            debug!(started = counts.started, "waiting for first use to resolve");

            counts = match self.wait_timeout {
                None => self
                    .changed
                    .wait_while(counts, |counts| counts.must_wait())
                    .unwrap_or_else(PoisonError::into_inner),
                Some(timeout) => {
                    let (counts, result) = self
                        .changed
                        .wait_timeout_while(counts, timeout, |counts| counts.must_wait())
                        .unwrap_or_else(PoisonError::into_inner);

                    if result.timed_out() {
                        bail!(
                            ErrorKind::UseWaitTimeout,
                            "Timed out waiting for first use to resolve",
                            format!("waited {timeout:?}")
                        );
                    }

                    counts
                }
            };
        }

        counts.started += 1;

        Ok(())
    }

    /// Marks a use as successfully finished and releases every waiter.
    pub fn complete_use(&self) {
        let mut counts = self.lock();
        if counts.finished >= counts.started {
            warn!("complete without a matching begin_use, ignoring");
            return;
        }
        counts.finished += 1;
        drop(counts);

        self.changed.notify_all();
    }

    /// Undoes a [`SharedUse::begin_use`] whose use failed.
    pub fn rollback_use(&self) {
        let mut counts = self.lock();
        // Completed uses stay counted, so only uses beyond them can roll back.
        if counts.started <= counts.finished {
            warn!("rollback without a matching begin_use, ignoring");
            return;
        }
        counts.started -= 1;
        drop(counts);

        counter!(SPOOL_SHARED_USE_ROLLBACKS_TOTAL).increment(1);
        self.changed.notify_all();
    }

    /// Begins a use that rolls back unless [`UseGuard::complete`] is called.
    pub fn enter(&self) -> SpoolResult<UseGuard<'_>> {
        self.begin_use()?;

        Ok(UseGuard {
            coordinator: self,
            resolved: false,
        })
    }

    /// Returns a snapshot of the counters.
    pub fn counts(&self) -> UseCounts {
        *self.lock()
    }

    /// Returns `true` once any use completed.
    pub fn is_materialized(&self) -> bool {
        self.lock().finished > 0
    }

    fn lock(&self) -> MutexGuard<'_, UseCounts> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped use of a [`SharedUse`]. Rolls back on drop unless completed.
#[derive(Debug)]
#[must_use = "dropping the guard rolls the use back"]
pub struct UseGuard<'a> {
    coordinator: &'a SharedUse,
    resolved: bool,
}

impl UseGuard<'_> {
    /// Completes the use.
    pub fn complete(mut self) {
        self.resolved = true;
        self.coordinator.complete_use();
    }
}

impl Drop for UseGuard<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.coordinator.rollback_use();
        }
    }
}
