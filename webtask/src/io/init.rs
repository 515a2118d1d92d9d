//! Scaffolding for `webtask init`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{DEFAULT_CONFIG_FILE, RunnerConfig, write_config};
use super::task_table::{sample_rows, write_table};

/// Canonical files and directories of a workspace rooted at `root`.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub tasks_path: PathBuf,
    pub screenshots_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub gitignore_path: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let cfg = RunnerConfig::default().resolve_paths(&root);
        Self {
            config_path: root.join(DEFAULT_CONFIG_FILE),
            gitignore_path: root.join(".gitignore"),
            tasks_path: cfg.tasks_path,
            screenshots_dir: cfg.screenshots_dir,
            audio_dir: cfg.audio_dir,
            logs_dir: cfg.logs_dir,
            root,
        }
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config and task table.
    pub force: bool,
}

/// Write a default config, a sample task table and the artifact directories.
///
/// Fails if the config already exists unless `options.force` is set.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<WorkspacePaths> {
    let paths = WorkspacePaths::new(root);
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "webtask init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    create_dir(&paths.screenshots_dir)?;
    create_dir(&paths.audio_dir)?;
    create_dir(&paths.logs_dir)?;

    // Paths in the written config stay relative to the config file.
    write_config(&paths.config_path, &RunnerConfig::default())?;
    if options.force || !paths.tasks_path.exists() {
        write_table(&paths.tasks_path, &sample_rows())?;
    }
    if !paths.gitignore_path.exists() {
        fs::write(&paths.gitignore_path, WORKSPACE_GITIGNORE)
            .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    }
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

const WORKSPACE_GITIGNORE: &str = ".webtask/\n.env\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;
    use crate::io::task_table::read_tasks;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.config_path.is_file());
        assert!(paths.tasks_path.is_file());
        assert!(paths.screenshots_dir.is_dir());
        assert!(paths.audio_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("read"),
            WORKSPACE_GITIGNORE
        );

        let cfg = load_config(&paths.config_path).expect("load config");
        assert_eq!(cfg, RunnerConfig::default());
        let tasks = read_tasks(&paths.tasks_path).expect("read tasks");
        let ids: Vec<&str> = tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["T001", "T002"]);
    }

    #[test]
    fn init_without_force_refuses_existing_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_workspace(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_keeps_existing_task_table_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(temp.path());
        fs::write(&paths.tasks_path, "[]\n").expect("write tasks");

        init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        assert_eq!(fs::read_to_string(&paths.tasks_path).expect("read"), "[]\n");

        init_workspace(temp.path(), &InitOptions { force: true }).expect("re-init");
        assert_eq!(read_tasks(&paths.tasks_path).expect("read tasks").len(), 2);
    }
}
