//! Telemetry setup shared by spool binaries and tests.

pub mod tracing;
