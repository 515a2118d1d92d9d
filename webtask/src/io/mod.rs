//! Side-effecting collaborators: files, child processes, browser, console.

pub mod artifacts;
pub mod browser;
pub mod chrome;
pub mod config;
pub mod engine;
pub mod human;
pub mod init;
pub mod process;
pub mod prompt;
pub mod result_sink;
pub mod run_log;
pub mod task_table;
