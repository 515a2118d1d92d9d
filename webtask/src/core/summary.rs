//! Run summary aggregated over the task results of one batch.

use std::fmt::Write as _;

use crate::core::types::{TaskResult, TaskStatus};

/// One line of the run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryEntry {
    pub task_id: String,
    pub status: TaskStatus,
    pub error: String,
}

/// Ordered outcome of every task submitted to a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub entries: Vec<SummaryEntry>,
}

impl RunSummary {
    pub fn push(&mut self, result: &TaskResult) {
        self.entries.push(SummaryEntry {
            task_id: result.task_id.clone(),
            status: result.status,
            error: result.error.clone(),
        });
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn succeeded(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.status == TaskStatus::Succeeded)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    /// Render the console block printed at the end of a run.
    pub fn render(&self) -> String {
        let rule = "=".repeat(60);
        let mut buf = String::new();
        let _ = writeln!(buf, "{rule}");
        let _ = writeln!(buf, "RUN SUMMARY");
        let _ = writeln!(buf, "{rule}");
        for entry in &self.entries {
            let label = match entry.status {
                TaskStatus::Succeeded => "OK",
                TaskStatus::Failed => "FAIL",
            };
            let _ = write!(buf, "  [{label}] {}: {}", entry.task_id, entry.status);
            if !entry.error.is_empty() {
                let _ = write!(buf, " -- {}", entry.error);
            }
            buf.push('\n');
        }
        let _ = writeln!(buf, "{rule}");
        let _ = writeln!(
            buf,
            "  {}/{} tasks succeeded.",
            self.succeeded(),
            self.total()
        );
        buf
    }
}
