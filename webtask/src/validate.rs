//! Validation of the config and task table before a run.

use anyhow::{Context, Result, anyhow};

use crate::io::config::RunnerConfig;
use crate::io::task_table::{TaskRow, duplicate_task_ids, load_table, read_tasks};

/// High-level validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    /// Rows in the table.
    pub total: usize,
    /// Rows that `run` would execute.
    pub pending: usize,
}

/// Validate the task table referenced by an already-loaded config.
///
/// Config validation happens on load. This checks the table against its
/// schema and rejects blank or duplicate task ids.
pub fn validate_workspace(cfg: &RunnerConfig) -> Result<ValidateOutcome> {
    let rows = load_table(&cfg.tasks_path)
        .with_context(|| format!("load task table {}", cfg.tasks_path.display()))?;
    let errors = table_errors(&rows);
    if !errors.is_empty() {
        return Err(anyhow!(
            "task table {} is invalid:\n- {}",
            cfg.tasks_path.display(),
            errors.join("\n- ")
        ));
    }
    let pending = read_tasks(&cfg.tasks_path)?.len();
    Ok(ValidateOutcome {
        total: rows.len(),
        pending,
    })
}

fn table_errors(rows: &[TaskRow]) -> Vec<String> {
    let mut errors = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        let id = row.task_id.as_deref().map(str::trim).unwrap_or_default();
        if id.is_empty() {
            errors.push(format!("row {} has no task_id", index + 1));
            continue;
        }
        if row.url.as_deref().is_none_or(|url| url.trim().is_empty()) {
            errors.push(format!("task '{id}' has no url"));
        }
    }
    for (id, first, second) in duplicate_task_ids(rows) {
        errors.push(format!("duplicate task_id '{id}' (rows {first} and {second})"));
    }
    errors
}
