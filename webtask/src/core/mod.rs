//! Deterministic, pure logic shared by the task execution core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod auth_gate;
pub mod retry;
pub mod scripts;
pub mod summary;
pub mod types;
pub mod wav;
