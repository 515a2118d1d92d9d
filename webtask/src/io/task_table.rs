//! Task table load/save with schema validation.
//!
//! The table is a JSON array of row objects. `task_id`, `url` and
//! `instructions` are required columns; result columns are added on first
//! write. Columns the runner does not know about are preserved.
//!
//! Spreadsheets are not read directly; export the sheet as described in
//! [`SPREADSHEET_HINT`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::core::types::{Task, TaskResult, TaskStatus};

pub const TASK_TABLE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/task_table.schema.json"
));

/// How to turn an existing task spreadsheet into a task table.
pub const SPREADSHEET_HINT: &str = "To reuse a spreadsheet, export its task sheet as a JSON array \
with one object per row, keyed by the header names (task_id, url, instructions, plus any extra \
columns). Leave the status column empty, or omit it, for rows that should run.";

pub const RESULT_COLUMNS: [&str; 5] = [
    "screenshot_link",
    "status",
    "error",
    "explanation",
    "audio_link",
];

/// Recording was requested for a task id that is not in the table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Task ID '{task_id}' not found in {}", path.display())]
pub struct UnknownTask {
    pub task_id: String,
    pub path: PathBuf,
}

/// Two rows share a task id, so their results could not be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("duplicate task_id '{task_id}' in {} (rows {first_row} and {second_row})", path.display())]
pub struct DuplicateTaskId {
    pub task_id: String,
    pub path: PathBuf,
    pub first_row: usize,
    pub second_row: usize,
}

/// One row of the task table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    pub task_id: Option<String>,
    pub url: Option<String>,
    pub instructions: Option<String>,
    /// Result columns and any extra columns, keyed by header.
    #[serde(flatten)]
    pub columns: Map<String, Value>,
}

impl TaskRow {
    pub fn new(task_id: &str, url: &str, instructions: &str) -> Self {
        Self {
            task_id: Some(task_id.to_string()),
            url: Some(url.to_string()),
            instructions: Some(instructions.to_string()),
            columns: Map::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&str> {
        self.columns.get(name).and_then(Value::as_str)
    }

    fn is_succeeded(&self) -> bool {
        self.column("status") == Some(TaskStatus::Succeeded.as_str())
    }

    fn to_task(&self) -> Option<Task> {
        let task_id = self.task_id.as_deref().map(str::trim).filter(|id| !id.is_empty())?;
        Some(Task {
            task_id: task_id.to_string(),
            url: self.url.clone().unwrap_or_default(),
            instructions: self.instructions.clone().unwrap_or_default(),
        })
    }

    fn apply_result(&mut self, result: &TaskResult) {
        let path_text = |path: &Option<PathBuf>| {
            path.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };
        let values = [
            path_text(&result.screenshot),
            result.status.as_str().to_string(),
            result.error.clone(),
            result.explanation.clone(),
            path_text(&result.audio),
        ];
        for (column, value) in RESULT_COLUMNS.into_iter().zip(values) {
            self.columns.insert(column.to_string(), Value::String(value));
        }
    }
}

/// Load every row of the table after schema validation.
pub fn load_table(path: &Path) -> Result<Vec<TaskRow>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read task table {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse task table {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate {}", path.display()))?;
    let rows: Vec<TaskRow> = serde_json::from_value(value)
        .with_context(|| format!("deserialize task table {}", path.display()))?;
    Ok(rows)
}

/// Every repeated task id as `(task_id, first_row, repeat_row)`, rows
/// numbered from 1. Blank ids are ignored.
pub fn duplicate_task_ids(rows: &[TaskRow]) -> Vec<(String, usize, usize)> {
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    let mut duplicates = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        let Some(id) = row.task_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) else {
            continue;
        };
        match first_seen.get(id) {
            Some(&first) => duplicates.push((id.to_string(), first, index + 1)),
            None => {
                first_seen.insert(id, index + 1);
            }
        }
    }
    duplicates
}

/// Read pending tasks in table order.
///
/// Rows without a task id and rows already marked `success` are skipped.
/// A task id used by more than one row, finished or not, fails with
/// [`DuplicateTaskId`].
pub fn read_tasks(path: &Path) -> Result<Vec<Task>> {
    let rows = load_table(path)?;
    if let Some((task_id, first_row, second_row)) = duplicate_task_ids(&rows).into_iter().next() {
        return Err(DuplicateTaskId {
            task_id,
            path: path.to_path_buf(),
            first_row,
            second_row,
        }
        .into());
    }
    let total = rows.len();
    let tasks: Vec<Task> = rows
        .iter()
        .filter(|row| !row.is_succeeded())
        .filter_map(TaskRow::to_task)
        .collect();
    debug!(path = %path.display(), total, pending = tasks.len(), "task table read");
    Ok(tasks)
}

/// Upsert a task's result columns.
///
/// Fails with [`UnknownTask`] when no row carries `result.task_id`.
pub fn update_task_result(path: &Path, result: &TaskResult) -> Result<()> {
    let mut rows = load_table(path)?;
    let row = rows
        .iter_mut()
        .find(|row| row.task_id.as_deref().map(str::trim) == Some(result.task_id.as_str()))
        .ok_or_else(|| UnknownTask {
            task_id: result.task_id.clone(),
            path: path.to_path_buf(),
        })?;
    row.apply_result(result);
    debug!(task_id = %result.task_id, status = %result.status, "task result written");
    write_table(path, &rows)
}

/// Atomically write the table (temp file + rename).
pub fn write_table(path: &Path, rows: &[TaskRow]) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(rows).context("serialize task table")?;
    buf.push('\n');
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp task table {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace task table {}", path.display()))?;
    Ok(())
}

/// Two example rows written by `webtask init`.
pub fn sample_rows() -> Vec<TaskRow> {
    vec![
        TaskRow::new(
            "T001",
            "https://example.com",
            "Verify the page title says 'Example Domain'. Click the 'More information...' link.",
        ),
        TaskRow::new(
            "T002",
            "https://httpbin.org/forms/post",
            "Fill the form: set 'custname' to 'Test User', 'custtel' to '555-1234', \
select 'medium' pizza size, check 'bacon' topping, and submit the form.",
        ),
    ]
}

fn validate_schema(table: &Value) -> Result<()> {
    let schema: Value =
        serde_json::from_str(TASK_TABLE_SCHEMA).context("parse task table schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    let messages: Vec<String> = compiled
        .iter_errors(table)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "task table schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_raw(dir: &Path, value: Value) -> PathBuf {
        let path = dir.join("tasks.json");
        fs::write(&path, serde_json::to_string_pretty(&value).expect("json")).expect("write");
        path
    }

    fn succeeded(task_id: &str, screenshot: &str) -> TaskResult {
        TaskResult {
            task_id: task_id.to_string(),
            status: TaskStatus::Succeeded,
            explanation: "done".to_string(),
            screenshot: Some(PathBuf::from(screenshot)),
            audio: None,
            error: String::new(),
        }
    }

    #[test]
    fn read_tasks_returns_all_rows() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        write_table(&path, &sample_rows()).expect("write");

        let tasks = read_tasks(&path).expect("read");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].task_id, "T001");
        assert_eq!(tasks[0].url, "https://example.com");
        assert_eq!(tasks[1].task_id, "T002");
    }

    #[test]
    fn read_tasks_skips_completed_and_blank_rows() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_raw(
            temp.path(),
            json!([
                {"task_id": "T001", "url": "https://example.com", "instructions": "Click login",
                 "screenshot_link": "pics/T001.png", "status": "success", "error": ""},
                {"task_id": "T002", "url": "https://example.org", "instructions": "Fill search",
                 "status": "failed", "error": "Element not found"},
                {"task_id": null, "url": null, "instructions": null}
            ]),
        );

        let tasks = read_tasks(&path).expect("read");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_id, "T002");
    }

    #[test]
    fn read_tasks_rejects_repeated_task_id() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_raw(
            temp.path(),
            json!([
                {"task_id": "T001", "url": "https://example.com", "instructions": "first"},
                {"task_id": "T002", "url": "https://example.org", "instructions": "other"},
                {"task_id": " T001 ", "url": "https://example.com", "instructions": "second"}
            ]),
        );

        let err = read_tasks(&path).unwrap_err();
        let duplicate = err.downcast_ref::<DuplicateTaskId>().expect("duplicate task id");
        assert_eq!(duplicate.task_id, "T001");
        assert_eq!((duplicate.first_row, duplicate.second_row), (1, 3));
        assert!(err.to_string().contains("duplicate task_id 'T001'"));
    }

    #[test]
    fn finished_row_still_counts_as_duplicate() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_raw(
            temp.path(),
            json!([
                {"task_id": "T001", "url": "u", "instructions": "i", "status": "success"},
                {"task_id": "T001", "url": "u", "instructions": "again"},
                {"task_id": null, "url": null, "instructions": null},
                {"task_id": "", "url": null, "instructions": null}
            ]),
        );
        let rows = load_table(&path).expect("load");
        assert_eq!(
            duplicate_task_ids(&rows),
            vec![("T001".to_string(), 1, 2)]
        );
        assert!(read_tasks(&path).is_err());
    }

    #[test]
    fn missing_required_columns_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_raw(
            temp.path(),
            json!([{"task_id": "T001", "instructions": "Click login"}]),
        );
        let err = read_tasks(&path).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("schema validation failed"), "{msg}");
        assert!(msg.contains("url"), "{msg}");
    }

    #[test]
    fn update_adds_result_columns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        write_table(&path, &sample_rows()).expect("write");

        update_task_result(&path, &succeeded("T001", "pics/T001_123.png")).expect("update");

        let rows = load_table(&path).expect("load");
        assert_eq!(rows[0].column("screenshot_link"), Some("pics/T001_123.png"));
        assert_eq!(rows[0].column("status"), Some("success"));
        assert_eq!(rows[0].column("audio_link"), Some(""));
        assert_eq!(rows[0].column("explanation"), Some("done"));
        assert!(rows[1].columns.is_empty());
    }

    #[test]
    fn update_overwrites_existing_result() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        write_table(&path, &sample_rows()).expect("write");

        update_task_result(&path, &TaskResult::failed("T002", "Element not found"))
            .expect("first");
        update_task_result(&path, &succeeded("T002", "pics/T002_456.png")).expect("second");

        let rows = load_table(&path).expect("load");
        assert_eq!(rows[1].column("status"), Some("success"));
        assert_eq!(rows[1].column("error"), Some(""));
        assert_eq!(rows[1].column("screenshot_link"), Some("pics/T002_456.png"));
    }

    #[test]
    fn update_unknown_task_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        write_table(&path, &sample_rows()).expect("write");

        let err = update_task_result(&path, &TaskResult::failed("NONEXISTENT", "not found"))
            .unwrap_err();
        let unknown = err.downcast_ref::<UnknownTask>().expect("unknown task");
        assert_eq!(unknown.task_id, "NONEXISTENT");
        assert!(err.to_string().contains("Task ID 'NONEXISTENT' not found"));
    }

    #[test]
    fn update_preserves_unknown_columns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_raw(
            temp.path(),
            json!([{"task_id": "T001", "url": "u", "instructions": "i", "owner": "qa-team"}]),
        );
        let mut result = succeeded("T001", "pics/a.png");
        result.audio = Some(PathBuf::from("audio/T001_1.wav"));
        update_task_result(&path, &result).expect("update");

        let rows = load_table(&path).expect("load");
        assert_eq!(rows[0].column("owner"), Some("qa-team"));
        assert_eq!(rows[0].column("audio_link"), Some("audio/T001_1.wav"));
    }
}
