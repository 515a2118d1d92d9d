//! Prompt builder for decision-engine turns.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::scripts::{ToneSpec, fake_audio_js, start_audio_capture_js};
use crate::core::types::{AgentSignal, TurnFeedback};
use crate::io::engine::TurnRequest;

const TURN_TEMPLATE: &str = include_str!("prompts/turn.md");

#[derive(Debug, Clone, Serialize)]
struct TranscriptEntry {
    turn: u32,
    note: Option<String>,
    signal: String,
    feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ScriptsContext {
    fake_audio: String,
    start_capture: String,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("turn", TURN_TEMPLATE)
            .expect("turn template should be valid");
        Self { env }
    }

    fn render_turn(&self, input: &TurnRequest<'_>, transcript: &[TranscriptEntry]) -> Result<String> {
        let template = self.env.get_template("turn")?;
        let rendered = template.render(context! {
            task => input.task,
            attempt => input.attempt,
            max_attempts => input.max_attempts,
            turn => input.turn,
            max_turns => input.max_turns,
            previous_failure => input.previous_failure.map(str::trim).filter(|s| !s.is_empty()),
            transcript => transcript,
            feedback => describe_feedback(input.feedback, &input.task.url),
            scripts => ScriptsContext {
                fake_audio: fake_audio_js(ToneSpec::default()),
                start_capture: start_audio_capture_js(),
            },
        })?;
        Ok(rendered)
    }
}

/// One-line rendering of a signal for the transcript.
pub fn describe_signal(signal: &AgentSignal) -> String {
    match signal {
        AgentSignal::Action { action } => {
            let detail = serde_json::to_string(action).unwrap_or_default();
            format!("{} {detail}", action.label())
        }
        AgentSignal::AuthNeeded { description } => format!("auth_needed: {description}"),
        AgentSignal::Complete {
            status, summary, ..
        } => format!("complete ({status:?}): {summary}"),
    }
}

/// Text shown to the engine for the feedback of the current turn.
pub fn describe_feedback(feedback: &TurnFeedback, url: &str) -> String {
    match feedback {
        TurnFeedback::Start => {
            format!("The browser has just opened {url}. Decide the first step.")
        }
        TurnFeedback::Observation { action, output } => {
            format!("Result of {action}:\n{output}")
        }
        TurnFeedback::Authenticated { seq } => format!(
            "The human confirmed authentication request #{seq} is complete. Continue the task in the same browser."
        ),
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    /// Full section content including header.
    content: String,
}

/// Parse sections from rendered template output using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker pattern")
    });

    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str().to_string();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, start, key, required)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map(|next| next.0)
            .unwrap_or(rendered.len());
        let content = rendered[*start..end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

/// Rendered length, counting the blank-line separators between sections.
fn total_len(sections: &[ParsedSection]) -> usize {
    let separators = sections.len().saturating_sub(1) * 2;
    sections.iter().map(|s| s.content.len()).sum::<usize>() + separators
}

/// Apply budget to parsed sections, dropping droppable sections as needed.
///
/// Drop order: audio -> failure -> transcript. If still over budget the last
/// section is truncated.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    if total_len(sections) <= budget {
        return;
    }

    for key in ["audio", "failure", "transcript"] {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let other_len = total_len(sections) - sections.last().map_or(0, |s| s.content.len());
    if let Some(last) = sections.last_mut() {
        let allowed = budget.saturating_sub(other_len);
        if last.content.len() > allowed {
            let before_len = last.content.len();
            let mut cut = allowed.saturating_sub(12);
            while cut > 0 && !last.content.is_char_boundary(cut) {
                cut -= 1;
            }
            last.content.truncate(cut);
            last.content.push_str("\n[truncated]");
            debug!(
                section = last.key,
                before_len,
                after_len = last.content.len(),
                "truncated section for budget"
            );
        }
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds turn prompts within a byte budget.
///
/// Old transcript entries are dropped first, then whole droppable sections.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_turn(&self, input: &TurnRequest<'_>) -> Result<PromptPack> {
        let engine = PromptEngine::new();
        let mut transcript: Vec<TranscriptEntry> = input
            .transcript
            .iter()
            .map(|record| TranscriptEntry {
                turn: record.turn,
                note: record.note.clone(),
                signal: describe_signal(&record.signal),
                feedback: record
                    .feedback
                    .as_ref()
                    .map(|f| describe_feedback(f, &input.task.url)),
            })
            .collect();

        let mut sections = parse_sections(&engine.render_turn(input, &transcript)?);
        let mut dropped_entries = 0usize;
        while total_len(&sections) > self.budget_bytes && transcript.len() > 1 {
            transcript.remove(0);
            dropped_entries += 1;
            sections = parse_sections(&engine.render_turn(input, &transcript)?);
        }
        if dropped_entries > 0 {
            debug!(dropped_entries, "dropped oldest transcript entries for budget");
        }
        apply_budget_to_sections(&mut sections, self.budget_bytes);

        Ok(PromptPack {
            content: render_sections(&sections),
        })
    }
}

/// A rendered prompt ready to send to the engine.
#[derive(Debug, Clone)]
pub struct PromptPack {
    content: String,
}

impl PromptPack {
    pub fn render(&self) -> String {
        self.content.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BrowserAction, Task, TurnRecord};

    fn task() -> Task {
        Task {
            task_id: "T001".to_string(),
            url: "https://example.com".to_string(),
            instructions: "Click the 'More information...' link.".to_string(),
        }
    }

    fn click_record(turn: u32, output: &str) -> TurnRecord {
        TurnRecord {
            turn,
            note: Some("following the link".to_string()),
            signal: AgentSignal::Action {
                action: BrowserAction::Click {
                    selector: "a".to_string(),
                },
            },
            feedback: Some(TurnFeedback::Observation {
                action: "click".to_string(),
                output: output.to_string(),
            }),
        }
    }

    fn inputs<'a>(
        task: &'a Task,
        transcript: &'a [TurnRecord],
        feedback: &'a TurnFeedback,
        previous_failure: Option<&'a str>,
    ) -> TurnRequest<'a> {
        TurnRequest {
            task,
            attempt: 2,
            max_attempts: 3,
            turn: 4,
            max_turns: 40,
            previous_failure,
            transcript,
            feedback,
        }
    }

    #[test]
    fn prompt_ordering_is_stable() {
        let task = task();
        let transcript = [click_record(1, "clicked a")];
        let feedback = TurnFeedback::Authenticated { seq: 2 };
        let content = PromptBuilder::new(60_000)
            .build_turn(&inputs(&task, &transcript, &feedback, Some("browser crashed")))
            .expect("build")
            .render();

        let positions: Vec<usize> = [
            "### Browser Agent Contract",
            "### Task",
            "### Attempt",
            "### Audio Tasks",
            "### Previous Attempt",
            "### Transcript",
            "### Current Turn",
        ]
        .iter()
        .map(|header| content.find(header).unwrap_or_else(|| panic!("missing {header}")))
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");

        assert!(content.contains("Task ID: T001"));
        assert!(content.contains("Attempt 2 of 3, turn 4 of at most 40."));
        assert!(content.contains("The previous attempt failed: browser crashed"));
        assert!(content.contains("authentication request #2 is complete"));
        assert!(content.contains("window.__audioCapture"));
        assert!(content.contains("runner collects the captured audio"));
        assert!(!content.contains("btoa("));
    }

    #[test]
    fn first_turn_omits_empty_sections() {
        let task = task();
        let feedback = TurnFeedback::Start;
        let content = PromptBuilder::new(60_000)
            .build_turn(&inputs(&task, &[], &feedback, None))
            .expect("build")
            .render();
        assert!(!content.contains("### Previous Attempt"));
        assert!(!content.contains("### Transcript"));
        assert!(content.contains("The browser has just opened https://example.com."));
        assert!(!content.contains("<!-- section:"));
    }

    #[test]
    fn budget_drops_old_transcript_then_optional_sections() {
        let task = task();
        let transcript: Vec<TurnRecord> = (1..=30)
            .map(|turn| click_record(turn, &format!("page text {}", "x".repeat(200))))
            .collect();
        let feedback = TurnFeedback::Observation {
            action: "snapshot".to_string(),
            output: "Title: Example Domain".to_string(),
        };
        let content = PromptBuilder::new(5_000)
            .build_turn(&inputs(&task, &transcript, &feedback, Some("timeout")))
            .expect("build")
            .render();

        assert!(content.len() <= 5_000, "len {}", content.len());
        assert!(content.contains("### Browser Agent Contract"));
        assert!(content.contains("### Current Turn"));
        assert!(content.contains("Title: Example Domain"));
        assert!(!content.contains("### Audio Tasks"));
        assert!(!content.contains("Turn 1:"));
    }

    #[test]
    fn signals_render_on_one_line() {
        let signal = AgentSignal::Action {
            action: BrowserAction::Navigate {
                url: "https://example.org".to_string(),
            },
        };
        assert_eq!(
            describe_signal(&signal),
            r#"navigate {"type":"navigate","url":"https://example.org"}"#
        );
        assert_eq!(
            describe_signal(&AgentSignal::AuthNeeded {
                description: "SSO login".to_string()
            }),
            "auth_needed: SSO login"
        );
    }
}
