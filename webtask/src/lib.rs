//! Web-task runner: drives an agent-controlled browser through a queue of
//! tasks, pausing for human authentication and retrying failed attempts.
//!
//! The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (auth bookkeeping, retry
//!   decisions, summaries, WAV headers). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (task table, Chrome, browser,
//!   agent command, console). Each sits behind a trait so tests can script it.
//!
//! [`execution`] holds the per-task state machine, [`batch`] runs it over
//! the queue, and [`run`] / [`validate`] implement CLI commands.

pub mod batch;
pub mod core;
pub mod execution;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
