//! Stable exit codes for ext-runner commands.
//!
//! `ext-runner validate` exits with the number of runs that differ from their
//! frozen baseline instead.

/// Every execution finished without errors.
pub const OK: i32 = 0;
/// The notification summary reported errors, or an error escaped the run.
pub const HAS_ERRORS: i32 = 1;

/// Exit code of `ext-runner validate` for `failed` runs, capped at 255 so a
/// nonzero count never wraps to success.
pub fn failed_runs(failed: usize) -> i32 {
    i32::try_from(failed.min(255)).unwrap_or(255)
}
