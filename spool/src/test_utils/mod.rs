//! Utilities for testing spool components.
//!
//! - [`clock`]: clocks that tests can move, either by hand or together with tokio's paused time.
//! - [`fs`]: a filesystem wrapper that simulates files held open by another process.
//! - [`scratch`]: self-cleaning scratch directories under the system temporary directory.
//! - [`wait`]: polling helpers for conditions reached by background work.

pub mod clock;
pub mod fs;
pub mod scratch;
pub mod wait;
