//! Per-task execution state machine.
//!
//! [`TaskLoop::execute`] drives one task through attempts, authentication
//! pauses and artifact capture, and records exactly one [`TaskResult`].
//! Collaborator failures (engine, browser, human channel) end the current
//! attempt; only bookkeeping defects and sink failures escape as `Err`.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::auth_gate::{AuthGate, AuthGateError, AuthRequest};
use crate::core::retry::RetryPolicy;
use crate::core::scripts::collect_audio_js;
use crate::core::types::{
    AgentSignal, AgentTurn, AttemptEnd, AttemptOutcome, LoopState, Task, TaskResult, TaskStatus,
    TurnFeedback, TurnRecord,
};
use crate::io::artifacts::{ArtifactKind, ArtifactStore};
use crate::io::browser::{Browser, Observation};
use crate::io::config::RunnerConfig;
use crate::io::engine::{DecisionEngine, TurnRequest};
use crate::io::human::HumanChannel;
use crate::io::process::truncate_text;
use crate::io::result_sink::ResultSink;

/// Error text of a task whose attempts all failed.
pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";
/// Error text of a task that asked for authentication too often.
pub const AUTH_EXHAUSTED: &str = "authentication attempts exhausted";

/// Limits applied by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_attempts: u32,
    pub max_auth_requests: u32,
    pub max_turns_per_attempt: u32,
    pub observation_limit_bytes: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

impl LoopConfig {
    pub fn from_config(cfg: &RunnerConfig) -> Self {
        Self {
            max_attempts: cfg.execution.max_attempts,
            max_auth_requests: cfg.execution.max_auth_requests,
            max_turns_per_attempt: cfg.execution.max_turns_per_attempt,
            observation_limit_bytes: cfg.agent.observation_limit_bytes,
        }
    }
}

/// Everything that happened in one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: String,
    pub duration_ms: u64,
    pub turns: Vec<TurnRecord>,
    pub end: AttemptEnd,
    pub outcome: AttemptOutcome,
}

/// Terminal result of a task plus the history that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub result: TaskResult,
    pub attempts: Vec<AttemptRecord>,
    pub trace: Vec<LoopState>,
}

/// How `run_attempt` left the attempt.
enum AttemptRun {
    Ended { end: AttemptEnd, turns: Vec<TurnRecord> },
    /// The gate refused another authentication request.
    AuthExhausted { turns: Vec<TurnRecord> },
}

/// Artifacts gathered across the attempts of one task.
#[derive(Default)]
struct Evidence {
    /// Latest emergency or agent-requested screenshot.
    screenshot: Option<PathBuf>,
    /// Latest audio collected from the page or reported by the agent.
    audio_base64: Option<String>,
}

/// Per-task state machine over injected collaborators.
pub struct TaskLoop<'a, E, B, H, S> {
    engine: &'a E,
    browser: &'a B,
    human: &'a H,
    artifacts: &'a ArtifactStore,
    sink: &'a S,
    retry: RetryPolicy,
    gate: AuthGate,
    config: LoopConfig,
}

impl<'a, E, B, H, S> TaskLoop<'a, E, B, H, S>
where
    E: DecisionEngine,
    B: Browser,
    H: HumanChannel,
    S: ResultSink,
{
    pub fn new(
        engine: &'a E,
        browser: &'a B,
        human: &'a H,
        artifacts: &'a ArtifactStore,
        sink: &'a S,
        config: LoopConfig,
    ) -> Self {
        Self {
            engine,
            browser,
            human,
            artifacts,
            sink,
            retry: RetryPolicy::new(config.max_attempts),
            gate: AuthGate::new(config.max_auth_requests),
            config,
        }
    }

    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    /// Run `task` to a terminal state and record its result.
    #[instrument(skip_all, fields(task_id = %task.task_id))]
    pub fn execute(&mut self, task: &Task) -> Result<TaskOutcome> {
        info!(url = %task.url, "task started");
        let mut trace = vec![LoopState::Starting];
        let mut attempts = Vec::new();
        let mut evidence = Evidence::default();
        let mut previous_failure: Option<String> = None;
        let mut attempt = 1u32;

        let (status, explanation, error) = loop {
            trace.push(LoopState::RunningAttempt);
            let started_at = Utc::now().to_rfc3339();
            let clock = Instant::now();
            let run = self.run_attempt(
                task,
                attempt,
                previous_failure.as_deref(),
                &mut trace,
                &mut evidence,
            )?;
            let duration_ms = clock.elapsed().as_millis() as u64;

            match run {
                AttemptRun::AuthExhausted { turns } => {
                    trace.push(LoopState::TerminalFailure);
                    attempts.push(AttemptRecord {
                        attempt,
                        started_at,
                        duration_ms,
                        turns,
                        end: AttemptEnd::Fault {
                            error: AUTH_EXHAUSTED.to_string(),
                        },
                        outcome: AttemptOutcome::Abandoned,
                    });
                    warn!(attempt, "authentication attempts exhausted");
                    break (
                        TaskStatus::Failed,
                        format!(
                            "gave up after {} authentication requests",
                            self.gate.opened(&task.task_id)
                        ),
                        AUTH_EXHAUSTED.to_string(),
                    );
                }
                AttemptRun::Ended { end, turns } => {
                    trace.push(LoopState::AttemptEnded);
                    if let AttemptEnd::Fault { error } = &end {
                        warn!(attempt, error = %error, "attempt faulted");
                        self.capture_screenshot(&task.task_id, &mut evidence, "emergency");
                    }
                    let text = end.text().to_string();
                    let outcome = if end.is_success() {
                        AttemptOutcome::Succeeded
                    } else if self.retry.should_retry(attempt, AttemptOutcome::Failed) {
                        AttemptOutcome::Failed
                    } else {
                        AttemptOutcome::Abandoned
                    };
                    info!(attempt, ?outcome, "attempt ended");
                    attempts.push(AttemptRecord {
                        attempt,
                        started_at,
                        duration_ms,
                        turns,
                        end,
                        outcome,
                    });
                    match outcome {
                        AttemptOutcome::Succeeded => {
                            trace.push(LoopState::TerminalSuccess);
                            break (TaskStatus::Succeeded, text, String::new());
                        }
                        AttemptOutcome::Failed => {
                            previous_failure = Some(text);
                            attempt += 1;
                        }
                        AttemptOutcome::Abandoned => {
                            trace.push(LoopState::TerminalFailure);
                            break (TaskStatus::Failed, text, MAX_RETRIES_EXCEEDED.to_string());
                        }
                    }
                }
            }
        };

        let screenshot = self
            .capture_screenshot(&task.task_id, &mut evidence, "final")
            .or_else(|| evidence.screenshot.clone());
        let audio = match self
            .artifacts
            .collect_audio(&task.task_id, evidence.audio_base64.as_deref())
        {
            Ok(path) => path,
            Err(err) => {
                warn!(err = %err, "saving audio failed");
                None
            }
        };

        let result = TaskResult {
            task_id: task.task_id.clone(),
            status,
            explanation,
            screenshot,
            audio,
            error,
        };
        self.sink
            .record(&result)
            .with_context(|| format!("record result for task {}", task.task_id))?;
        info!(status = %result.status, attempts = attempts.len(), "task finished");

        Ok(TaskOutcome {
            result,
            attempts,
            trace,
        })
    }

    fn run_attempt(
        &mut self,
        task: &Task,
        attempt: u32,
        previous_failure: Option<&str>,
        trace: &mut Vec<LoopState>,
        evidence: &mut Evidence,
    ) -> Result<AttemptRun> {
        debug!(attempt, "attempt started");
        let mut turns: Vec<TurnRecord> = Vec::new();
        if let Err(err) = self.browser.navigate(&task.url) {
            return Ok(fault(turns, format!("navigation to {} failed: {err:#}", task.url)));
        }

        let mut feedback = TurnFeedback::Start;
        let mut turn = 1u32;
        loop {
            if turn > self.config.max_turns_per_attempt {
                return Ok(fault(
                    turns,
                    format!(
                        "turn limit of {} reached without completion",
                        self.config.max_turns_per_attempt
                    ),
                ));
            }
            let request = TurnRequest {
                task,
                attempt,
                max_attempts: self.retry.max_attempts,
                turn,
                max_turns: self.config.max_turns_per_attempt,
                previous_failure,
                transcript: &turns,
                feedback: &feedback,
            };
            let agent_turn = match self.engine.next_turn(&request) {
                Ok(agent_turn) => agent_turn,
                Err(err) => {
                    return Ok(fault(turns, format!("decision engine failed: {err:#}")));
                }
            };
            if let Some(note) = &agent_turn.note {
                info!(turn, note = %note, "agent progress");
            }

            let next_feedback = match &agent_turn.signal {
                AgentSignal::Action { action } => {
                    debug!(turn, action = action.label(), "performing browser action");
                    let observation = match self.browser.perform(action) {
                        Ok(observation) => observation,
                        Err(err) => {
                            let error =
                                format!("browser action {} failed: {err:#}", action.label());
                            turns.push(record(turn, agent_turn, None));
                            return Ok(fault(turns, error));
                        }
                    };
                    TurnFeedback::Observation {
                        action: action.label().to_string(),
                        output: self.describe_observation(&task.task_id, observation, evidence),
                    }
                }
                AgentSignal::AuthNeeded { description } => {
                    trace.push(LoopState::AwaitingAuth);
                    let request = match self.gate.open(&task.task_id, description) {
                        Ok(request) => request,
                        Err(AuthGateError::AuthLimitExceeded { limit, .. }) => {
                            warn!(limit, "authentication limit reached");
                            turns.push(record(turn, agent_turn, None));
                            return Ok(AttemptRun::AuthExhausted { turns });
                        }
                        Err(err) => return Err(err.into()),
                    };
                    if let Err(err) = self.await_human(&request) {
                        self.gate.abandon(&task.task_id);
                        turns.push(record(turn, agent_turn, None));
                        return Ok(fault(turns, format!("human channel failed: {err:#}")));
                    }
                    let resolved = self.gate.resolve(&task.task_id)?;
                    trace.push(LoopState::RunningAttempt);
                    TurnFeedback::Authenticated { seq: resolved.seq }
                }
                AgentSignal::Complete {
                    status,
                    summary,
                    audio_base64,
                } => {
                    if let Some(payload) = self
                        .collect_page_audio()
                        .or_else(|| audio_base64.clone().filter(|p| !p.trim().is_empty()))
                    {
                        evidence.audio_base64 = Some(payload);
                    }
                    let end = AttemptEnd::Completed {
                        status: *status,
                        summary: summary.clone(),
                    };
                    turns.push(record(turn, agent_turn, None));
                    return Ok(AttemptRun::Ended { end, turns });
                }
            };

            turns.push(record(turn, agent_turn, Some(next_feedback.clone())));
            feedback = next_feedback;
            turn += 1;
        }
    }

    fn await_human(&self, request: &AuthRequest) -> Result<()> {
        info!(seq = request.seq, description = %request.description, "waiting for human authentication");
        self.human.await_authentication(request)
    }

    /// Audio buffered by the capture snippet, read straight from the page.
    ///
    /// The payload bypasses the observation limit. An empty result means no
    /// capture ran; errors are logged and treated the same way.
    fn collect_page_audio(&self) -> Option<String> {
        match self.browser.evaluate(&collect_audio_js()) {
            Ok(payload) if !payload.trim().is_empty() => {
                debug!(bytes = payload.len(), "collected page audio");
                Some(payload)
            }
            Ok(_) => None,
            Err(err) => {
                warn!(err = %err, "collecting page audio failed");
                None
            }
        }
    }

    fn describe_observation(
        &self,
        task_id: &str,
        observation: Observation,
        evidence: &mut Evidence,
    ) -> String {
        match observation {
            Observation::Text(text) => truncate_text(&text, self.config.observation_limit_bytes),
            Observation::Image(bytes) => {
                match self.artifacts.save(task_id, ArtifactKind::Screenshot, &bytes) {
                    Ok(Some(path)) => {
                        let text = format!("screenshot saved to {}", path.display());
                        evidence.screenshot = Some(path);
                        text
                    }
                    Ok(None) => "screenshot was empty".to_string(),
                    Err(err) => {
                        warn!(err = %err, "saving requested screenshot failed");
                        format!("screenshot captured but not saved: {err}")
                    }
                }
            }
        }
    }

    /// Best-effort screenshot; remembered as fallback evidence when saved.
    fn capture_screenshot(
        &self,
        task_id: &str,
        evidence: &mut Evidence,
        purpose: &str,
    ) -> Option<PathBuf> {
        let bytes = match self.browser.screenshot() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(purpose, err = %err, "screenshot failed");
                return None;
            }
        };
        match self.artifacts.save(task_id, ArtifactKind::Screenshot, &bytes) {
            Ok(Some(path)) => {
                evidence.screenshot = Some(path.clone());
                Some(path)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(purpose, err = %err, "saving screenshot failed");
                None
            }
        }
    }
}

fn record(turn: u32, agent_turn: AgentTurn, feedback: Option<TurnFeedback>) -> TurnRecord {
    TurnRecord {
        turn,
        note: agent_turn.note,
        signal: agent_turn.signal,
        feedback,
    }
}

fn fault(turns: Vec<TurnRecord>, error: String) -> AttemptRun {
    AttemptRun::Ended {
        end: AttemptEnd::Fault { error },
        turns,
    }
}
