use std::time::SystemTime;

/// Source of wall-clock time for liveness markers.
///
/// Marker ages are compared against file modification times, so the clock must be a wall
/// clock rather than a monotonic one.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> SystemTime;
}

/// [`Clock`] reading [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}
