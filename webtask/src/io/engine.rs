//! Decision-engine abstraction and the command-driven implementation.
//!
//! The [`DecisionEngine`] trait decouples the task loop from the agent
//! backend. [`CommandEngine`] spawns the configured agent command once per
//! turn; tests use scripted engines that return predetermined turns.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{AgentSignal, AgentTurn, Task, TurnFeedback, TurnRecord};
use crate::io::config::AgentConfig;
use crate::io::process::{run_agent, truncate_text};
use crate::io::prompt::PromptBuilder;

pub const AGENT_TURN_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/agent_turn.schema.json"
));
const SCHEMA_FILE: &str = "agent_turn.schema.json";

/// Inputs for one decision-engine turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    pub task: &'a Task,
    /// 1-based attempt index.
    pub attempt: u32,
    pub max_attempts: u32,
    /// 1-based turn index within the attempt.
    pub turn: u32,
    pub max_turns: u32,
    /// Failure text of the previous attempt, if this is a retry.
    pub previous_failure: Option<&'a str>,
    /// Finished turns of the current attempt.
    pub transcript: &'a [TurnRecord],
    pub feedback: &'a TurnFeedback,
}

/// Proposes the next step of an attempt.
pub trait DecisionEngine {
    fn next_turn(&self, request: &TurnRequest<'_>) -> Result<AgentTurn>;
}

/// Engine that runs an agent command per turn.
///
/// The rendered prompt is written to the command's stdin. `{schema}` and
/// `{output}` in the configured arguments are replaced with the output
/// schema path and the path the agent must write its JSON turn to.
pub struct CommandEngine {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    prompts: PromptBuilder,
    run_dir: PathBuf,
    schema_path: PathBuf,
}

impl CommandEngine {
    /// Create an engine writing per-turn files under `run_dir`.
    pub fn new(cfg: &AgentConfig, run_dir: impl Into<PathBuf>) -> Result<Self> {
        if cfg.command.first().is_none_or(|program| program.trim().is_empty()) {
            bail!("agent command is empty");
        }
        let run_dir = std::path::absolute(run_dir.into()).context("resolve run dir")?;
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("create run dir {}", run_dir.display()))?;
        let schema_path = run_dir.join(SCHEMA_FILE);
        fs::write(&schema_path, AGENT_TURN_SCHEMA)
            .with_context(|| format!("write output schema {}", schema_path.display()))?;
        Ok(Self {
            command: cfg.command.clone(),
            timeout: Duration::from_secs(cfg.turn_timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
            prompts: PromptBuilder::new(cfg.prompt_budget_bytes),
            run_dir,
            schema_path,
        })
    }

    fn program(&self) -> &str {
        self.command.first().map_or("", String::as_str)
    }

    fn turn_dir(&self, request: &TurnRequest<'_>) -> PathBuf {
        self.run_dir
            .join(&request.task.task_id)
            .join(format!("attempt-{}", request.attempt))
            .join(format!("turn-{:03}", request.turn))
    }

    fn build_command(&self, output_path: &Path) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent command is empty"))?;
        let schema = self.schema_path.to_string_lossy();
        let output = output_path.to_string_lossy();
        let mut cmd = Command::new(program);
        for arg in args {
            cmd.arg(arg.replace("{schema}", &schema).replace("{output}", &output));
        }
        cmd.current_dir(&self.run_dir);
        Ok(cmd)
    }
}

impl DecisionEngine for CommandEngine {
    #[instrument(skip_all, fields(task_id = %request.task.task_id, attempt = request.attempt, turn = request.turn))]
    fn next_turn(&self, request: &TurnRequest<'_>) -> Result<AgentTurn> {
        let dir = self.turn_dir(request);
        fs::create_dir_all(&dir).with_context(|| format!("create turn dir {}", dir.display()))?;
        let prompt_path = dir.join("prompt.md");
        let output_path = dir.join("output.json");
        let log_path = dir.join("agent.log");

        let prompt = self.prompts.build_turn(request)?.render();
        fs::write(&prompt_path, &prompt)
            .with_context(|| format!("write prompt {}", prompt_path.display()))?;

        // A turn rerun into the same directory must not read the last agent's answer.
        if output_path.exists() {
            fs::remove_file(&output_path)
                .with_context(|| format!("remove stale agent output {}", output_path.display()))?;
            debug!(path = %output_path.display(), "removed stale agent output");
        }

        debug!(program = %self.program(), "starting agent turn");
        let cmd = self.build_command(&output_path)?;
        let output = run_agent(cmd, prompt.as_bytes(), self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run agent command {}", self.program()))?;

        let log = truncate_text(&output.log_text(), self.output_limit_bytes);
        fs::write(&log_path, log).with_context(|| format!("write agent log {}", log_path.display()))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "agent turn timed out");
            return Err(anyhow!("agent timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent command failed");
            return Err(anyhow!(
                "agent command failed with status {:?} (see {})",
                output.status.code(),
                log_path.display()
            ));
        }

        let turn = load_turn_output(&output_path)?;
        info!(signal = signal_kind(&turn), "agent turn received");
        Ok(turn)
    }
}

fn signal_kind(turn: &AgentTurn) -> &'static str {
    match &turn.signal {
        AgentSignal::Action { action } => action.label(),
        AgentSignal::AuthNeeded { .. } => "auth_needed",
        AgentSignal::Complete { .. } => "complete",
    }
}

/// Read, schema-check and parse the JSON turn the agent wrote.
pub fn load_turn_output(path: &Path) -> Result<AgentTurn> {
    if !path.exists() {
        return Err(anyhow!("missing agent output {}", path.display()));
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read agent output {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    parse_turn(&value).with_context(|| format!("invalid agent output {}", path.display()))
}

/// Validate `value` against the turn schema and deserialize it.
pub fn parse_turn(value: &Value) -> Result<AgentTurn> {
    let schema: Value = serde_json::from_str(AGENT_TURN_SCHEMA).context("parse turn schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    let messages: Vec<String> = compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "agent output schema validation failed: {}",
            messages.join("; ")
        ));
    }
    serde_json::from_value(value.clone()).context("deserialize agent turn")
}
