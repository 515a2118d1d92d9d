//! Stable exit codes for webtask CLI commands.

/// Command succeeded; for `run`, every task succeeded or nothing was pending.
pub const OK: i32 = 0;
/// Invalid config or task table, Chrome failed to start, or another fatal error.
pub const INVALID: i32 = 1;
/// `webtask run` finished with at least one failed task.
pub const TASKS_FAILED: i32 = 2;
