//! Retry decision after an attempt ends.

use crate::core::types::AttemptOutcome;

/// Default number of attempts per task.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Return true iff another attempt should run.
///
/// `attempt_index` is 1-based. Only a failed attempt below the ceiling is
/// retried; a succeeded or already-abandoned attempt never is.
pub fn should_retry(attempt_index: u32, max_attempts: u32, outcome: AttemptOutcome) -> bool {
    outcome == AttemptOutcome::Failed && attempt_index < max_attempts
}

/// Retry policy bound to a fixed attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn should_retry(&self, attempt_index: u32, outcome: AttemptOutcome) -> bool {
        should_retry(attempt_index, self.max_attempts, outcome)
    }
}
