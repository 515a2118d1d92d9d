//! Batch runner: drives the task loop over the pending queue in order.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use anyhow::Result;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::core::summary::RunSummary;
use crate::core::types::{Task, TaskResult};
use crate::execution::{TaskLoop, TaskOutcome};
use crate::io::browser::Browser;
use crate::io::engine::DecisionEngine;
use crate::io::human::HumanChannel;
use crate::io::result_sink::ResultSink;
use crate::io::task_table::UnknownTask;

/// An error or panic escaped the task loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoopDefect {
    #[error("task loop error: {0}")]
    Error(String),
    #[error("task loop panicked: {0}")]
    Panic(String),
}

/// Something that runs one task to completion and records its result.
pub trait ExecuteTask {
    fn execute(&mut self, task: &Task) -> Result<TaskOutcome>;
}

impl<E, B, H, S> ExecuteTask for TaskLoop<'_, E, B, H, S>
where
    E: DecisionEngine,
    B: Browser,
    H: HumanChannel,
    S: ResultSink,
{
    fn execute(&mut self, task: &Task) -> Result<TaskOutcome> {
        TaskLoop::execute(self, task)
    }
}

/// Run every task in order, isolating per-task defects.
///
/// A defect becomes a failed result recorded through `sink`, and the batch
/// moves on. An [`UnknownTask`] from the sink means the store no longer
/// matches the queue and aborts the batch. `on_task` is called after each
/// task with its result and, when the loop finished normally, its outcome.
#[instrument(skip_all, fields(tasks = tasks.len()))]
pub fn run_batch<X, S, F>(
    tasks: &[Task],
    runner: &mut X,
    sink: &S,
    mut on_task: F,
) -> Result<RunSummary>
where
    X: ExecuteTask,
    S: ResultSink,
    F: FnMut(&TaskResult, Option<&TaskOutcome>),
{
    let mut summary = RunSummary::default();
    for (index, task) in tasks.iter().enumerate() {
        info!(
            task_id = %task.task_id,
            position = index + 1,
            total = tasks.len(),
            "processing task"
        );
        let caught = panic::catch_unwind(AssertUnwindSafe(|| runner.execute(task)));
        let defect = match caught {
            Ok(Ok(outcome)) => {
                summary.push(&outcome.result);
                on_task(&outcome.result, Some(&outcome));
                continue;
            }
            Ok(Err(err)) => {
                if err.downcast_ref::<UnknownTask>().is_some() {
                    error!(task_id = %task.task_id, err = %format!("{err:#}"), "task store out of sync, aborting batch");
                    return Err(err);
                }
                LoopDefect::Error(format!("{err:#}"))
            }
            Err(payload) => LoopDefect::Panic(panic_message(payload.as_ref())),
        };

        error!(task_id = %task.task_id, defect = %defect, "task loop defect");
        let result = TaskResult::failed(&task.task_id, defect.to_string());
        if let Err(err) = sink.record(&result) {
            if err.downcast_ref::<UnknownTask>().is_some() {
                return Err(err);
            }
            error!(task_id = %task.task_id, err = %format!("{err:#}"), "recording failed result also failed");
        }
        summary.push(&result);
        on_task(&result, None);
    }
    info!(
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        "batch finished"
    );
    Ok(summary)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
