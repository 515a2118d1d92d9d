//! Per-run logs under `{logs_dir}/{run_id}/`.
//!
//! Each task gets a directory holding `result.json` (terminal result and
//! state trace) and one `attempt-N/attempt.json` per attempt. The command
//! engine writes its per-turn prompt and output files into the same tree.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::types::{LoopState, TaskResult};
use crate::execution::{AttemptRecord, TaskOutcome};

/// Run identifier derived from the start time.
pub fn new_run_id(at: DateTime<Utc>) -> String {
    format!("run-{}", at.format("%Y%m%d_%H%M%S"))
}

#[derive(Debug, Clone)]
pub struct TaskLogPaths {
    pub dir: PathBuf,
    pub result_path: PathBuf,
}

impl TaskLogPaths {
    pub fn new(run_dir: &Path, task_id: &str) -> Self {
        let dir = run_dir.join(task_id);
        Self {
            result_path: dir.join("result.json"),
            dir,
        }
    }

    pub fn attempt_path(&self, attempt: u32) -> PathBuf {
        self.dir
            .join(format!("attempt-{attempt}"))
            .join("attempt.json")
    }
}

#[derive(Debug, Serialize)]
struct ResultLog<'a> {
    result: &'a TaskResult,
    trace: &'a [LoopState],
    attempts: usize,
}

/// Write the result and every attempt record of one task.
pub fn write_task_log(run_dir: &Path, outcome: &TaskOutcome) -> Result<TaskLogPaths> {
    let paths = TaskLogPaths::new(run_dir, &outcome.result.task_id);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create task log dir {}", paths.dir.display()))?;

    // Write in deterministic order to keep logs stable.
    for record in &outcome.attempts {
        write_attempt(&paths, record)?;
    }
    write_json(
        &paths.result_path,
        &ResultLog {
            result: &outcome.result,
            trace: &outcome.trace,
            attempts: outcome.attempts.len(),
        },
    )?;
    Ok(paths)
}

/// Write the result of a task that never produced an outcome.
pub fn write_defect_log(run_dir: &Path, result: &TaskResult) -> Result<TaskLogPaths> {
    let paths = TaskLogPaths::new(run_dir, &result.task_id);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create task log dir {}", paths.dir.display()))?;
    write_json(
        &paths.result_path,
        &ResultLog {
            result,
            trace: &[],
            attempts: 0,
        },
    )?;
    Ok(paths)
}

fn write_attempt(paths: &TaskLogPaths, record: &AttemptRecord) -> Result<()> {
    let path = paths.attempt_path(record.attempt);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create attempt dir {}", parent.display()))?;
    }
    write_json(&path, record)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AttemptEnd, AttemptOutcome, TaskStatus};
    use chrono::TimeZone;
    use serde_json::Value;

    fn outcome() -> TaskOutcome {
        TaskOutcome {
            result: TaskResult {
                task_id: "T002".to_string(),
                status: TaskStatus::Failed,
                explanation: "browser crashed".to_string(),
                screenshot: None,
                audio: None,
                error: "max retries exceeded".to_string(),
            },
            attempts: (1..=2)
                .map(|attempt| AttemptRecord {
                    attempt,
                    started_at: "2026-01-01T00:00:00+00:00".to_string(),
                    duration_ms: 5,
                    turns: Vec::new(),
                    end: AttemptEnd::Fault {
                        error: "browser crashed".to_string(),
                    },
                    outcome: if attempt == 2 {
                        AttemptOutcome::Abandoned
                    } else {
                        AttemptOutcome::Failed
                    },
                })
                .collect(),
            trace: vec![LoopState::Starting, LoopState::RunningAttempt],
        }
    }

    #[test]
    fn run_id_is_timestamped() {
        let at = Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(new_run_id(at), "run-20260506_070809");
    }

    #[test]
    fn task_log_paths_are_stable() {
        let paths = TaskLogPaths::new(Path::new("/logs/run-1"), "T001");
        assert_eq!(paths.result_path, PathBuf::from("/logs/run-1/T001/result.json"));
        assert_eq!(
            paths.attempt_path(3),
            PathBuf::from("/logs/run-1/T001/attempt-3/attempt.json")
        );
    }

    #[test]
    fn writes_result_and_attempts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = write_task_log(temp.path(), &outcome()).expect("write");

        let result: Value =
            serde_json::from_str(&fs::read_to_string(&paths.result_path).expect("read"))
                .expect("json");
        assert_eq!(result["result"]["error"], "max retries exceeded");
        assert_eq!(result["trace"][1], "RUNNING_ATTEMPT");
        assert_eq!(result["attempts"], 2);

        let attempt: Value = serde_json::from_str(
            &fs::read_to_string(paths.attempt_path(2)).expect("read"),
        )
        .expect("json");
        assert_eq!(attempt["outcome"], "abandoned");
        assert_eq!(attempt["end"]["kind"], "fault");
    }

    #[test]
    fn defect_log_has_empty_trace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = TaskResult::failed("T009", "task loop panicked: boom");
        let paths = write_defect_log(temp.path(), &result).expect("write");
        let value: Value =
            serde_json::from_str(&fs::read_to_string(&paths.result_path).expect("read"))
                .expect("json");
        assert_eq!(value["trace"], serde_json::json!([]));
    }
}
