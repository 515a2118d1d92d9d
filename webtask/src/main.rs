//! Web-task runner CLI.
//!
//! Reads pending tasks from a JSON task table, drives a Chrome session with
//! an agent command, and writes each task's result back to the table.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use webtask::core::scripts::{ToneSpec, collect_audio_js, fake_audio_js, start_audio_capture_js};
use webtask::exit_codes;
use webtask::io::config::{DEFAULT_CONFIG_FILE, RunnerConfig, load_resolved};
use webtask::io::init::{InitOptions, init_workspace};
use webtask::io::task_table::{SPREADSHEET_HINT, read_tasks};
use webtask::logging;
use webtask::run::{RunOutcome, run_pending};
use webtask::validate::validate_workspace;

#[derive(Parser)]
#[command(
    name = "webtask",
    version,
    about = "Run agent-driven browser tasks with retries and human authentication"
)]
struct Cli {
    /// Config file. Relative paths inside it resolve against its directory.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Task table, overriding `tasks_path` from the config.
    #[arg(long, global = true)]
    tasks: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `webtask.toml`, a sample task table and artifact dirs.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Check the config and the task table.
    Validate,
    /// Print pending tasks in execution order.
    List,
    /// Execute every pending task.
    Run,
    /// Print a browser JavaScript snippet used for audio tasks.
    Script {
        #[command(subcommand)]
        script: Script,
    },
}

#[derive(Subcommand)]
enum Script {
    /// Replace microphone input with a synthetic tone.
    FakeAudio {
        /// Tone frequency in Hz (0 for silence).
        #[arg(long, default_value_t = 440.0)]
        frequency: f64,
        /// Tone duration in seconds.
        #[arg(long, default_value_t = 10.0)]
        duration: f64,
    },
    /// Start buffering audio the page plays or records.
    StartCapture,
    /// Encode the buffered audio as a base64 WAV.
    CollectAudio,
}

fn main() {
    dotenvy::dotenv().ok();
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Validate => cmd_validate(&load(&cli.config, cli.tasks)?),
        Command::List => cmd_list(&load(&cli.config, cli.tasks)?),
        Command::Run => cmd_run(&load(&cli.config, cli.tasks)?),
        Command::Script { script } => {
            println!("{}", render_script(&script));
            Ok(exit_codes::OK)
        }
    }
}

fn load(config: &Path, tasks: Option<PathBuf>) -> Result<RunnerConfig> {
    let mut cfg =
        load_resolved(config).with_context(|| format!("load config {}", config.display()))?;
    if let Some(tasks) = tasks {
        cfg.tasks_path = tasks;
    }
    Ok(cfg)
}

fn cmd_init(config: &Path, force: bool) -> Result<i32> {
    let root = match config.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent.to_path_buf(),
        None => env::current_dir().context("read current directory")?,
    };
    let paths = init_workspace(&root, &InitOptions { force })?;
    println!("Wrote {}", paths.config_path.display());
    println!("Task table: {}", paths.tasks_path.display());
    println!("{SPREADSHEET_HINT}");
    Ok(exit_codes::OK)
}

fn cmd_validate(cfg: &RunnerConfig) -> Result<i32> {
    let outcome = validate_workspace(cfg)?;
    println!(
        "OK: {} tasks, {} pending ({})",
        outcome.total,
        outcome.pending,
        cfg.tasks_path.display()
    );
    Ok(exit_codes::OK)
}

fn cmd_list(cfg: &RunnerConfig) -> Result<i32> {
    let tasks = read_tasks(&cfg.tasks_path)?;
    if tasks.is_empty() {
        println!("No pending tasks.");
    }
    for task in tasks {
        println!("{}\t{}", task.task_id, task.url);
    }
    Ok(exit_codes::OK)
}

fn cmd_run(cfg: &RunnerConfig) -> Result<i32> {
    match run_pending(cfg)? {
        RunOutcome::NothingPending => {
            println!("No pending tasks.");
            Ok(exit_codes::OK)
        }
        RunOutcome::Finished { summary, run_dir } => {
            print!("{}", summary.render());
            println!("  Logs: {}", run_dir.display());
            if summary.all_succeeded() {
                Ok(exit_codes::OK)
            } else {
                Ok(exit_codes::TASKS_FAILED)
            }
        }
    }
}

fn render_script(script: &Script) -> String {
    match script {
        Script::FakeAudio {
            frequency,
            duration,
        } => fake_audio_js(ToneSpec {
            frequency_hz: *frequency,
            duration_secs: *duration,
        }),
        Script::StartCapture => start_audio_capture_js(),
        Script::CollectAudio => collect_audio_js(),
    }
}
