//! Scripted collaborators and fixtures for exercising the task loop without
//! Chrome, an agent command or a console.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use anyhow::{Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tempfile::TempDir;

use crate::core::auth_gate::AuthRequest;
use crate::core::types::{
    AgentSignal, AgentTurn, BrowserAction, CompletionStatus, Task, TaskResult, TurnFeedback,
};
use crate::core::wav::encode_pcm16;
use crate::io::artifacts::ArtifactStore;
use crate::io::browser::Browser;
use crate::io::engine::{DecisionEngine, TurnRequest};
use crate::io::human::HumanChannel;
use crate::io::result_sink::ResultSink;
use crate::io::task_table::UnknownTask;

/// Minimal valid PNG (8-byte signature plus an IHDR-shaped tail).
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

pub fn task(task_id: &str) -> Task {
    Task {
        task_id: task_id.to_string(),
        url: format!("https://example.com/{}", task_id.to_lowercase()),
        instructions: format!("Complete {task_id}"),
    }
}

/// Short PCM16 mono WAV, base64-encoded as an agent would report it.
pub fn wav_base64() -> String {
    let samples: Vec<i16> = (0..800).map(|i| ((i % 40) * 400) as i16).collect();
    STANDARD.encode(encode_pcm16(&samples, 8_000, 1))
}

/// Sine tone as a PCM16 mono WAV of `secs` seconds, base64-encoded the way
/// the capture snippet returns it.
pub fn tone_wav_base64(sample_rate: u32, secs: f64) -> String {
    let count = (f64::from(sample_rate) * secs) as usize;
    let samples: Vec<i16> = (0..count)
        .map(|i| {
            let t = i as f64 / f64::from(sample_rate);
            ((t * 440.0 * std::f64::consts::TAU).sin() * 12_000.0) as i16
        })
        .collect();
    STANDARD.encode(encode_pcm16(&samples, sample_rate, 1))
}

/// Artifact store rooted in a fresh temp directory.
pub fn temp_store() -> (TempDir, ArtifactStore) {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(temp.path().join("pics"), temp.path().join("audio"));
    (temp, store)
}

pub fn click(selector: &str) -> AgentTurn {
    AgentTurn::new(AgentSignal::Action {
        action: BrowserAction::Click {
            selector: selector.to_string(),
        },
    })
}

pub fn action(action: BrowserAction) -> AgentTurn {
    AgentTurn::new(AgentSignal::Action { action })
}

pub fn auth_needed(description: &str) -> AgentTurn {
    AgentTurn::new(AgentSignal::AuthNeeded {
        description: description.to_string(),
    })
}

pub fn complete(status: CompletionStatus, summary: &str) -> AgentTurn {
    AgentTurn::new(AgentSignal::Complete {
        status,
        summary: summary.to_string(),
        audio_base64: None,
    })
}

pub fn complete_with_audio(summary: &str, audio_base64: String) -> AgentTurn {
    AgentTurn::new(AgentSignal::Complete {
        status: CompletionStatus::Success,
        summary: summary.to_string(),
        audio_base64: Some(audio_base64),
    })
}

/// What the engine was asked on one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub task_id: String,
    pub attempt: u32,
    pub turn: u32,
    pub previous_failure: Option<String>,
    pub transcript_len: usize,
    pub feedback: TurnFeedback,
}

/// Decision engine replaying per-task queues of turns.
///
/// An exhausted queue is an engine error.
#[derive(Default)]
pub struct ScriptedEngine {
    turns: RefCell<HashMap<String, VecDeque<Result<AgentTurn, String>>>>,
    seen: RefCell<Vec<SeenRequest>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task_id: &str, turn: AgentTurn) -> &Self {
        self.queue(task_id, Ok(turn))
    }

    pub fn push_error(&self, task_id: &str, message: &str) -> &Self {
        self.queue(task_id, Err(message.to_string()))
    }

    fn queue(&self, task_id: &str, entry: Result<AgentTurn, String>) -> &Self {
        self.turns
            .borrow_mut()
            .entry(task_id.to_string())
            .or_default()
            .push_back(entry);
        self
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.borrow().clone()
    }

    pub fn remaining(&self, task_id: &str) -> usize {
        self.turns.borrow().get(task_id).map_or(0, VecDeque::len)
    }
}

impl DecisionEngine for ScriptedEngine {
    fn next_turn(&self, request: &TurnRequest<'_>) -> Result<AgentTurn> {
        self.seen.borrow_mut().push(SeenRequest {
            task_id: request.task.task_id.clone(),
            attempt: request.attempt,
            turn: request.turn,
            previous_failure: request.previous_failure.map(str::to_string),
            transcript_len: request.transcript.len(),
            feedback: request.feedback.clone(),
        });
        let next = self
            .turns
            .borrow_mut()
            .get_mut(&request.task.task_id)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(turn)) => Ok(turn),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!(
                "no scripted turn left for {}",
                request.task.task_id
            )),
        }
    }
}

/// Browser recording calls, with queued per-operation outcomes.
///
/// Calls with nothing queued succeed.
///
/// Operation names: `navigate`, `click`, `type`, `snapshot`, `evaluate`,
/// `screenshot`.
pub struct ScriptedBrowser {
    calls: RefCell<Vec<String>>,
    /// Per-operation outcomes for upcoming calls; `None` lets a call pass.
    script: RefCell<HashMap<&'static str, VecDeque<Option<String>>>>,
    snapshot_text: String,
    screenshot_bytes: Vec<u8>,
    /// What `evaluate` returns; empty like a page with nothing captured.
    evaluate_result: RefCell<String>,
}

impl Default for ScriptedBrowser {
    fn default() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            script: RefCell::new(HashMap::new()),
            snapshot_text: "Title: Example Domain".to_string(),
            screenshot_bytes: PNG_BYTES.to_vec(),
            evaluate_result: RefCell::new(String::new()),
        }
    }
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `times` failing calls of `op`, after anything already queued.
    pub fn fail(&self, op: &'static str, message: &str, times: usize) -> &Self {
        self.queue(op, Some(message), times)
    }

    /// Queue `times` succeeding calls of `op`, after anything already queued.
    pub fn pass(&self, op: &'static str, times: usize) -> &Self {
        self.queue(op, None, times)
    }

    fn queue(&self, op: &'static str, outcome: Option<&str>, times: usize) -> &Self {
        let mut script = self.script.borrow_mut();
        let queue = script.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(outcome.map(str::to_string));
        }
        self
    }

    /// Make every later `evaluate` return `result`.
    pub fn evaluate_returns(&self, result: impl Into<String>) -> &Self {
        *self.evaluate_result.borrow_mut() = result.into();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.split(' ').next() == Some(op))
            .count()
    }

    fn call(&self, op: &'static str, detail: &str) -> Result<()> {
        let entry = if detail.is_empty() {
            op.to_string()
        } else {
            format!("{op} {detail}")
        };
        self.calls.borrow_mut().push(entry);
        match self
            .script
            .borrow_mut()
            .get_mut(op)
            .and_then(VecDeque::pop_front)
            .flatten()
        {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }
}

impl Browser for ScriptedBrowser {
    fn navigate(&self, url: &str) -> Result<()> {
        self.call("navigate", url)
    }

    fn click(&self, selector: &str) -> Result<()> {
        self.call("click", selector)
    }

    fn type_text(&self, selector: &str, _text: &str) -> Result<()> {
        self.call("type", selector)
    }

    fn snapshot(&self) -> Result<String> {
        self.call("snapshot", "")?;
        Ok(self.snapshot_text.clone())
    }

    fn evaluate(&self, _script: &str) -> Result<String> {
        self.call("evaluate", "")?;
        Ok(self.evaluate_result.borrow().clone())
    }

    fn screenshot(&self) -> Result<Vec<u8>> {
        self.call("screenshot", "")?;
        Ok(self.screenshot_bytes.clone())
    }
}

/// Human channel that confirms immediately, or fails once armed.
#[derive(Default)]
pub struct ScriptedHuman {
    requests: RefCell<Vec<AuthRequest>>,
    failure: RefCell<Option<String>>,
}

impl ScriptedHuman {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later request fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: RefCell::new(Some(message.to_string())),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<AuthRequest> {
        self.requests.borrow().clone()
    }
}

impl HumanChannel for ScriptedHuman {
    fn await_authentication(&self, request: &AuthRequest) -> Result<()> {
        self.requests.borrow_mut().push(request.clone());
        match self.failure.borrow().as_deref() {
            Some(message) => Err(anyhow!(message.to_string())),
            None => Ok(()),
        }
    }
}

/// In-memory result store with upsert semantics.
#[derive(Default)]
pub struct MemorySink {
    results: RefCell<Vec<TaskResult>>,
    writes: Cell<usize>,
    /// Task ids the store does not know; recording them fails.
    unknown: RefCell<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, task_id: &str) -> &Self {
        self.unknown.borrow_mut().push(task_id.to_string());
        self
    }

    pub fn results(&self) -> Vec<TaskResult> {
        self.results.borrow().clone()
    }

    pub fn get(&self, task_id: &str) -> Option<TaskResult> {
        self.results
            .borrow()
            .iter()
            .find(|r| r.task_id == task_id)
            .cloned()
    }

    /// Number of `record` calls that succeeded.
    pub fn writes(&self) -> usize {
        self.writes.get()
    }
}

impl ResultSink for MemorySink {
    fn record(&self, result: &TaskResult) -> Result<()> {
        if self.unknown.borrow().iter().any(|id| id == &result.task_id) {
            return Err(UnknownTask {
                task_id: result.task_id.clone(),
                path: "memory".into(),
            }
            .into());
        }
        let mut results = self.results.borrow_mut();
        match results.iter_mut().find(|r| r.task_id == result.task_id) {
            Some(existing) => *existing = result.clone(),
            None => results.push(result.clone()),
        }
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}
