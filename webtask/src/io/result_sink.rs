//! Durable recording of terminal task results.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::instrument;

use crate::core::types::TaskResult;
use crate::io::task_table::update_task_result;

/// Upserts a task's terminal result, keyed by task id.
pub trait ResultSink {
    /// Fails with [`crate::io::task_table::UnknownTask`] when the store has no
    /// row for `result.task_id`.
    fn record(&self, result: &TaskResult) -> Result<()>;
}

/// Sink backed by the JSON task table the tasks were read from.
#[derive(Debug, Clone)]
pub struct TaskTableSink {
    path: PathBuf,
}

impl TaskTableSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for TaskTableSink {
    #[instrument(skip_all, fields(task_id = %result.task_id, status = %result.status))]
    fn record(&self, result: &TaskResult) -> Result<()> {
        update_task_result(&self.path, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::task_table::{UnknownTask, load_table, sample_rows, write_table};

    #[test]
    fn records_into_task_table() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        write_table(&path, &sample_rows()).expect("write");
        let sink = TaskTableSink::new(&path);

        sink.record(&TaskResult::failed("T002", "max retries exceeded"))
            .expect("record");

        let rows = load_table(sink.path()).expect("load");
        assert_eq!(rows[1].column("status"), Some("failed"));
        assert_eq!(rows[1].column("error"), Some("max retries exceeded"));
    }

    #[test]
    fn unknown_task_is_detectable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        write_table(&path, &sample_rows()).expect("write");

        let err = TaskTableSink::new(&path)
            .record(&TaskResult::failed("T999", "x"))
            .unwrap_err();
        assert!(err.downcast_ref::<UnknownTask>().is_some());
    }
}
