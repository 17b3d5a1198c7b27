use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, SpoolResult};

/// Fires after a working directory was created and registered, before its marker is written.
pub const WORKDIR_ACQUIRE_BEFORE_MARKER: &str = "workdir.acquire.before_marker";

/// Fires before the reaper deletes a stale candidate.
pub const WORKDIR_REAP_BEFORE_DELETE: &str = "workdir.reap.before_delete";

/// Returns an error when the named fail point is configured to `return`.
///
/// The optional parameter selects the error kind: `io` (default) or `invalid_state`.
pub fn spool_fail_point(name: &str) -> SpoolResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("invalid_state") => ErrorKind::InvalidState,
            _ => ErrorKind::IoError,
        };

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
