//! Runner configuration stored in `webtask.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::auth_gate::DEFAULT_MAX_AUTH_REQUESTS;
use crate::core::retry::DEFAULT_MAX_ATTEMPTS;

pub const DEFAULT_CONFIG_FILE: &str = "webtask.toml";

/// Runner configuration (TOML).
///
/// Edited by humans. Missing fields fall back to defaults, so an empty file
/// is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Task table read at start and updated after every task.
    pub tasks_path: PathBuf,
    pub screenshots_dir: PathBuf,
    pub audio_dir: PathBuf,
    /// Per-run attempt logs.
    pub logs_dir: PathBuf,

    pub execution: ExecutionConfig,
    pub chrome: ChromeConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_attempts: u32,
    /// Authentication pauses allowed per task before it is failed.
    pub max_auth_requests: u32,
    /// Decision-engine turns allowed within one attempt.
    pub max_turns_per_attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChromeConfig {
    /// Chrome executable. `CHROME_PATH` takes precedence when set.
    pub path: Option<PathBuf>,
    pub cdp_port: u16,
    /// Profile directory, kept between runs so logins persist.
    pub user_data_dir: Option<PathBuf>,
    pub startup_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    /// Launch with fake microphone/camera devices.
    pub fake_media: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent command. The prompt is fed on stdin; `{schema}` and `{output}`
    /// placeholders are replaced with the output schema and output paths.
    pub command: Vec<String>,
    pub turn_timeout_secs: u64,
    /// Truncate agent stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Truncate browser observations fed back to the agent.
    pub observation_limit_bytes: usize,
    pub prompt_budget_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tasks_path: PathBuf::from("tasks.json"),
            screenshots_dir: PathBuf::from("pics"),
            audio_dir: PathBuf::from("audio"),
            logs_dir: PathBuf::from(".webtask/runs"),
            execution: ExecutionConfig::default(),
            chrome: ChromeConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_auth_requests: DEFAULT_MAX_AUTH_REQUESTS,
            max_turns_per_attempt: 40,
        }
    }
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            path: None,
            cdp_port: 9222,
            user_data_dir: None,
            startup_timeout_secs: 15,
            shutdown_timeout_secs: 10,
            fake_media: true,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: [
                "codex",
                "exec",
                "--skip-git-repo-check",
                "--output-schema",
                "{schema}",
                "--output-last-message",
                "{output}",
                "-",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            turn_timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
            observation_limit_bytes: 20_000,
            prompt_budget_bytes: 60_000,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.execution.max_attempts == 0 {
            return Err(anyhow!("execution.max_attempts must be > 0"));
        }
        if self.execution.max_auth_requests == 0 {
            return Err(anyhow!("execution.max_auth_requests must be > 0"));
        }
        if self.execution.max_turns_per_attempt == 0 {
            return Err(anyhow!("execution.max_turns_per_attempt must be > 0"));
        }
        if self.chrome.cdp_port == 0 {
            return Err(anyhow!("chrome.cdp_port must be > 0"));
        }
        if self.chrome.startup_timeout_secs == 0 {
            return Err(anyhow!("chrome.startup_timeout_secs must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.turn_timeout_secs == 0 {
            return Err(anyhow!("agent.turn_timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.agent.observation_limit_bytes == 0 {
            return Err(anyhow!("agent.observation_limit_bytes must be > 0"));
        }
        Ok(())
    }

    /// Resolve relative paths against `base` (the config file's directory).
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        for path in [
            &mut self.tasks_path,
            &mut self.screenshots_dir,
            &mut self.audio_dir,
            &mut self.logs_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Load config and resolve its relative paths against the file's directory.
pub fn load_resolved(path: &Path) -> Result<RunnerConfig> {
    let cfg = load_config(path)?;
    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    Ok(cfg.resolve_paths(base))
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
