//! CLI tests spawning the webtask binary.
//!
//! None of these reach Chrome: `run` is only exercised with nothing pending
//! or with an invalid config.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use webtask::exit_codes;
use webtask::io::init::{InitOptions, WorkspacePaths, init_workspace};
use webtask::io::task_table::{SPREADSHEET_HINT, TaskRow, load_table, write_table};

fn webtask(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_webtask"))
        .current_dir(dir)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("spawn webtask")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn init_then_validate_and_list() {
    let temp = tempfile::tempdir().expect("tempdir");

    let init = webtask(temp.path(), &["init"]);
    assert_eq!(init.status.code(), Some(exit_codes::OK));
    assert!(stdout(&init).contains(SPREADSHEET_HINT));
    let paths = WorkspacePaths::new(temp.path());
    assert!(paths.config_path.is_file());
    assert!(paths.tasks_path.is_file());

    let again = webtask(temp.path(), &["init"]);
    assert_eq!(again.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&again.stderr).contains("already exists"));

    let validate = webtask(temp.path(), &["validate"]);
    assert_eq!(validate.status.code(), Some(exit_codes::OK));
    assert!(stdout(&validate).contains("OK: 2 tasks, 2 pending"));

    let list = webtask(temp.path(), &["list"]);
    assert_eq!(list.status.code(), Some(exit_codes::OK));
    let lines: Vec<String> = stdout(&list).lines().map(str::to_string).collect();
    assert_eq!(
        lines,
        vec![
            "T001\thttps://example.com".to_string(),
            "T002\thttps://httpbin.org/forms/post".to_string(),
        ]
    );
}

#[test]
fn run_with_nothing_pending_exits_ok_without_chrome() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
    let mut row = TaskRow::new("T001", "https://example.com", "Open it");
    row.columns
        .insert("status".to_string(), Value::String("success".to_string()));
    write_table(&paths.tasks_path, &[row]).expect("write table");

    let run = webtask(temp.path(), &["run"]);
    assert_eq!(run.status.code(), Some(exit_codes::OK));
    assert!(stdout(&run).contains("No pending tasks."));
}

#[test]
fn tasks_flag_overrides_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
    let other = temp.path().join("other.json");
    write_table(&other, &[TaskRow::new("X9", "https://example.net", "Look")]).expect("write");

    let list = webtask(temp.path(), &["list", "--tasks", "other.json"]);
    assert_eq!(list.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&list).trim(), "X9\thttps://example.net");
}

#[test]
fn run_refuses_repeated_task_ids_before_starting_chrome() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
    write_table(
        &paths.tasks_path,
        &[
            TaskRow::new("T001", "https://example.com", "first"),
            TaskRow::new("T001", "https://example.com", "second"),
        ],
    )
    .expect("write table");

    let run = webtask(temp.path(), &["run"]);
    assert_eq!(run.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&run.stderr).contains("duplicate task_id 'T001'"));
    let rows = load_table(&paths.tasks_path).expect("load");
    assert!(rows.iter().all(|row| row.column("status").is_none()));
    assert!(fs::read_dir(&paths.logs_dir).expect("logs dir").next().is_none());
}

#[test]
fn invalid_config_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("webtask.toml"),
        "[execution]\nmax_attempts = 0\n",
    )
    .expect("write config");

    let run = webtask(temp.path(), &["run"]);
    assert_eq!(run.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&run.stderr).contains("max_attempts must be > 0"));
}

#[test]
fn malformed_task_table_fails_validation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
    fs::write(&paths.tasks_path, r#"[{"task_id": "T001"}]"#).expect("write table");

    let validate = webtask(temp.path(), &["validate"]);
    assert_eq!(validate.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&validate.stderr).contains("schema validation failed"));
}

#[test]
fn script_prints_javascript() {
    let temp = tempfile::tempdir().expect("tempdir");
    let capture = webtask(temp.path(), &["script", "start-capture"]);
    assert_eq!(capture.status.code(), Some(exit_codes::OK));
    assert!(stdout(&capture).contains("window.__audioCapture"));

    let tone = webtask(temp.path(), &["script", "fake-audio", "--frequency", "0"]);
    assert_eq!(tone.status.code(), Some(exit_codes::OK));
    assert!(stdout(&tone).contains("setValueAtTime(0,"));
}
