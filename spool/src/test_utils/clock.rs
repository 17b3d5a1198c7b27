use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use tokio::time::Instant;

use crate::workdir::Clock;

/// Returns the current wall-clock time truncated to whole seconds.
///
/// Filesystems differ in timestamp precision, whole seconds survive a round trip everywhere.
fn whole_seconds_now() -> SystemTime {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();

    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(whole_seconds_now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: SystemTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A wall clock driven by tokio's clock.
///
/// Under `#[tokio::test(start_paused = true)]` it advances exactly as far as tokio's paused
/// time, which keeps marker ages in step with interval ticks.
#[derive(Debug)]
pub struct TokioClock {
    origin: SystemTime,
    started: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: whole_seconds_now(),
            started: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> SystemTime {
        self.origin + self.started.elapsed()
    }
}
