//! Orchestration for `webtask run`.
//!
//! Reads the pending queue, prepares shared resources (artifact directories,
//! Chrome, the browser session, the agent engine) and hands the queue to the
//! batch runner. Failures before the first task starts are fatal.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::batch::run_batch;
use crate::core::summary::RunSummary;
use crate::execution::{LoopConfig, TaskLoop};
use crate::io::artifacts::ArtifactStore;
use crate::io::browser::CdpBrowser;
use crate::io::chrome::ChromeProcess;
use crate::io::config::RunnerConfig;
use crate::io::engine::CommandEngine;
use crate::io::human::ConsoleHumanChannel;
use crate::io::result_sink::TaskTableSink;
use crate::io::run_log::{new_run_id, write_defect_log, write_task_log};
use crate::io::task_table::read_tasks;

/// Outcome of `webtask run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every row is already marked `success` (or the table is empty).
    NothingPending,
    Finished {
        summary: RunSummary,
        /// Per-run log directory.
        run_dir: PathBuf,
    },
}

/// Execute every pending task of the configured table.
#[instrument(skip_all, fields(tasks_path = %cfg.tasks_path.display()))]
pub fn run_pending(cfg: &RunnerConfig) -> Result<RunOutcome> {
    let tasks = read_tasks(&cfg.tasks_path)?;
    if tasks.is_empty() {
        info!("no pending tasks");
        return Ok(RunOutcome::NothingPending);
    }
    info!(pending = tasks.len(), "pending tasks loaded");

    let artifacts = ArtifactStore::new(&cfg.screenshots_dir, &cfg.audio_dir);
    let pending_ids: Vec<String> = tasks.iter().map(|t| t.task_id.clone()).collect();
    if let Err(err) = artifacts.clear_for(&pending_ids) {
        warn!(err = %err, "clearing stale artifacts failed");
    }

    let run_dir = cfg.logs_dir.join(new_run_id(Utc::now()));
    let engine = CommandEngine::new(&cfg.agent, &run_dir)?;

    let mut chrome = ChromeProcess::launch(&cfg.chrome).context("start chrome")?;
    let summary = {
        let browser = CdpBrowser::connect(chrome.cdp_port()).context("connect to chrome")?;
        let human = ConsoleHumanChannel::stdio();
        let sink = TaskTableSink::new(&cfg.tasks_path);
        let mut task_loop = TaskLoop::new(
            &engine,
            &browser,
            &human,
            &artifacts,
            &sink,
            LoopConfig::from_config(cfg),
        );
        run_batch(&tasks, &mut task_loop, &sink, |result, outcome| {
            let written = match outcome {
                Some(outcome) => write_task_log(&run_dir, outcome),
                None => write_defect_log(&run_dir, result),
            };
            if let Err(err) = written {
                warn!(task_id = %result.task_id, err = %format!("{err:#}"), "writing run log failed");
            }
        })?
    };
    chrome.stop();

    info!(
        run_dir = %run_dir.display(),
        succeeded = summary.succeeded(),
        total = summary.total(),
        "run finished"
    );
    Ok(RunOutcome::Finished { summary, run_dir })
}
