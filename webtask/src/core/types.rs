//! Shared deterministic types for the task execution core.
//!
//! These types define the contracts between the loop and its collaborators.
//! They carry no I/O and serialize to the stable JSON shapes used by the task
//! table, the agent output schema and the run log.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One unit of work read from the task table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub url: String,
    pub instructions: String,
}

/// Terminal status of a task as stored in the task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "success")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Succeeded => "success",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status carried by the agent's completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Success,
    Failed,
}

/// Browser action requested by the decision engine.
///
/// The loop forwards these to the browser capability without interpreting
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserAction {
    Navigate { url: String },
    Click { selector: String },
    Type { selector: String, text: String },
    Snapshot,
    Evaluate { script: String },
    Screenshot,
}

impl BrowserAction {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            BrowserAction::Navigate { .. } => "navigate",
            BrowserAction::Click { .. } => "click",
            BrowserAction::Type { .. } => "type",
            BrowserAction::Snapshot => "snapshot",
            BrowserAction::Evaluate { .. } => "evaluate",
            BrowserAction::Screenshot => "screenshot",
        }
    }
}

/// The single signal carried by one decision-engine turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentSignal {
    /// Perform a browser action and report back.
    Action { action: BrowserAction },
    /// A human must authenticate before the agent can continue.
    AuthNeeded { description: String },
    /// The agent is done with this attempt.
    Complete {
        status: CompletionStatus,
        summary: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio_base64: Option<String>,
    },
}

/// Structured output of one decision-engine turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTurn {
    /// Free-form progress note.
    #[serde(default)]
    pub note: Option<String>,
    pub signal: AgentSignal,
}

impl AgentTurn {
    pub fn new(signal: AgentSignal) -> Self {
        Self { note: None, signal }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// What the loop tells the engine at the start of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnFeedback {
    /// First turn of an attempt; the browser is on the task URL.
    Start,
    /// Result of the action requested on the previous turn.
    Observation { action: String, output: String },
    /// The human resolved authentication request `seq`.
    Authenticated { seq: u64 },
}

/// One finished turn within an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn: u32,
    pub note: Option<String>,
    pub signal: AgentSignal,
    /// Feedback produced by handling `signal`, if any.
    pub feedback: Option<TurnFeedback>,
}

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptEnd {
    /// The engine returned a completion signal.
    Completed {
        status: CompletionStatus,
        summary: String,
    },
    /// Engine, browser or human-channel error, or the turn ceiling.
    Fault { error: String },
}

impl AttemptEnd {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            AttemptEnd::Completed {
                status: CompletionStatus::Success,
                ..
            }
        )
    }

    /// Summary on completion, error text on fault.
    pub fn text(&self) -> &str {
        match self {
            AttemptEnd::Completed { summary, .. } => summary,
            AttemptEnd::Fault { error } => error,
        }
    }
}

/// Outcome of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    /// Failed with no retry left.
    Abandoned,
}

/// Terminal record for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub explanation: String,
    pub screenshot: Option<PathBuf>,
    pub audio: Option<PathBuf>,
    /// Empty on success, non-empty on failure.
    pub error: String,
}

impl TaskResult {
    pub fn failed(task_id: &str, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
            explanation: String::new(),
            screenshot: None,
            audio: None,
            error: error.into(),
        }
    }
}

/// States of the per-task execution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    Starting,
    RunningAttempt,
    AwaitingAuth,
    AttemptEnded,
    TerminalSuccess,
    TerminalFailure,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::TerminalSuccess | LoopState::TerminalFailure)
    }
}
