//! Metric names emitted by spool components.

/// Label for the read-ahead pipeline name.
pub const PIPELINE_LABEL: &str = "pipeline";

/// Label for the outcome of a producer run.
pub const OUTCOME_LABEL: &str = "outcome";

// Read-ahead metrics

/// Counter for consumer pulls that found the read-ahead queue empty.
pub const SPOOL_READ_AHEAD_STALLS_TOTAL: &str = "spool_read_ahead_stalls_total";

/// Counter for finished producers, labeled by outcome.
pub const SPOOL_READ_AHEAD_PRODUCERS_FINISHED_TOTAL: &str =
    "spool_read_ahead_producers_finished_total";

// Shared use metrics

/// Counter for first uses that were rolled back.
pub const SPOOL_SHARED_USE_ROLLBACKS_TOTAL: &str = "spool_shared_use_rollbacks_total";

/// Counter for callers that had to wait for a first use to resolve.
pub const SPOOL_SHARED_USE_WAITS_TOTAL: &str = "spool_shared_use_waits_total";

// Working directory metrics

/// Gauge for the number of currently registered working directories.
pub const SPOOL_WORKDIRS_REGISTERED: &str = "spool_workdirs_registered";

/// Counter for liveness marker refreshes.
pub const SPOOL_WORKDIR_HEARTBEATS_TOTAL: &str = "spool_workdir_heartbeats_total";

/// Counter for orphaned working directories reclaimed by the reaper.
pub const SPOOL_WORKDIRS_REAPED_TOTAL: &str = "spool_workdirs_reaped_total";

/// Counter for files or directories that could not be deleted.
pub const SPOOL_WORKDIR_DELETE_FAILURES_TOTAL: &str = "spool_workdir_delete_failures_total";
