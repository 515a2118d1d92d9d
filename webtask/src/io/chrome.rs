//! Chrome process lifecycle: launch with remote debugging, wait for the
//! DevTools endpoint, shut down on drop.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::io::config::ChromeConfig;

pub const CHROME_PATH_ENV: &str = "CHROME_PATH";
const PROFILE_DIR_NAME: &str = ".webtask-chrome-profile";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[cfg(target_os = "windows")]
const CANDIDATES: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"%LOCALAPPDATA%\Google\Chrome\Application\chrome.exe",
];
#[cfg(target_os = "macos")]
const CANDIDATES: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
];

/// Pick the Chrome executable.
///
/// Order: `env_override` (the `CHROME_PATH` value), the configured path,
/// then well-known install locations and names on `PATH`.
pub fn resolve_chrome_path(
    env_override: Option<OsString>,
    configured: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = env_override.filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    if let Some(path) = configured {
        return Some(path.to_path_buf());
    }
    CANDIDATES.iter().find_map(|candidate| locate(candidate))
}

fn locate(candidate: &str) -> Option<PathBuf> {
    let expanded = expand_local_app_data(candidate);
    let path = Path::new(&expanded);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }
    let search = env::var_os("PATH")?;
    env::split_paths(&search)
        .map(|dir| dir.join(path))
        .find(|full| full.is_file())
}

fn expand_local_app_data(candidate: &str) -> String {
    match env::var("LOCALAPPDATA") {
        Ok(value) => candidate.replace("%LOCALAPPDATA%", &value),
        Err(_) => candidate.to_string(),
    }
}

fn default_profile_dir() -> PathBuf {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir)
        .join(PROFILE_DIR_NAME)
}

/// Command-line arguments Chrome is launched with.
pub fn launch_args(cfg: &ChromeConfig) -> Vec<OsString> {
    let profile = cfg
        .user_data_dir
        .clone()
        .unwrap_or_else(default_profile_dir);
    let mut args: Vec<OsString> = vec![
        format!("--remote-debugging-port={}", cfg.cdp_port).into(),
        "--no-first-run".into(),
        "--no-default-browser-check".into(),
    ];
    let mut profile_arg = OsString::from("--user-data-dir=");
    profile_arg.push(profile);
    args.push(profile_arg);
    if cfg.fake_media {
        args.push("--use-fake-device-for-media-stream".into());
        args.push("--use-fake-ui-for-media-stream".into());
    }
    args
}

/// A Chrome instance started by the runner. Dropping it stops Chrome.
#[derive(Debug)]
pub struct ChromeProcess {
    child: Child,
    cdp_port: u16,
    shutdown_timeout: Duration,
    stopped: bool,
}

impl ChromeProcess {
    /// Launch Chrome and block until its DevTools endpoint answers.
    #[instrument(skip_all, fields(cdp_port = cfg.cdp_port))]
    pub fn launch(cfg: &ChromeConfig) -> Result<Self> {
        let exe = resolve_chrome_path(env::var_os(CHROME_PATH_ENV), cfg.path.as_deref())
            .ok_or_else(|| {
                anyhow!("Chrome not found. Set {CHROME_PATH_ENV} or chrome.path in the config")
            })?;
        info!(exe = %exe.display(), "launching chrome");
        let mut cmd = Command::new(&exe);
        cmd.args(launch_args(cfg))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = cmd
            .spawn()
            .with_context(|| format!("spawn chrome {}", exe.display()))?;
        let mut process = Self {
            child,
            cdp_port: cfg.cdp_port,
            shutdown_timeout: Duration::from_secs(cfg.shutdown_timeout_secs),
            stopped: false,
        };
        process.wait_until_ready(Duration::from_secs(cfg.startup_timeout_secs))?;
        Ok(process)
    }

    pub fn cdp_port(&self) -> u16 {
        self.cdp_port
    }

    fn wait_until_ready(&mut self, timeout: Duration) -> Result<()> {
        let url = format!("http://127.0.0.1:{}/json/version", self.cdp_port);
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait().context("poll chrome")? {
                self.stopped = true;
                return Err(anyhow!("Chrome exited with {status} before becoming ready"));
            }
            if let Ok(resp) = reqwest::blocking::get(&url)
                && resp.status().is_success()
            {
                info!(cdp_port = self.cdp_port, "chrome devtools endpoint ready");
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        self.stop();
        Err(anyhow!(
            "Chrome did not become ready on port {} after {} seconds",
            self.cdp_port,
            timeout.as_secs()
        ))
    }

    /// Ask Chrome to exit, then kill it if it is still running after the
    /// shutdown timeout.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("shutting down chrome");
        request_exit(self.child.id());
        match self.child.wait_timeout(self.shutdown_timeout) {
            Ok(Some(status)) => {
                debug!(%status, "chrome exited");
                return;
            }
            Ok(None) => warn!("chrome did not exit after terminate, killing"),
            Err(e) => warn!(err = %e, "wait for chrome failed, killing"),
        }
        if let Err(e) = self.child.kill() {
            warn!(err = %e, "kill chrome failed");
        }
        let _ = self.child.wait();
    }
}

impl Drop for ChromeProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(unix)]
fn request_exit(pid: u32) {
    let status = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = status {
        warn!(err = %e, "send SIGTERM to chrome failed");
    }
}

#[cfg(windows)]
fn request_exit(pid: u32) {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = status {
        warn!(err = %e, "taskkill chrome failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_over_config() {
        let resolved = resolve_chrome_path(
            Some(OsString::from("/opt/custom/chrome")),
            Some(Path::new("/usr/bin/chromium")),
        );
        assert_eq!(resolved, Some(PathBuf::from("/opt/custom/chrome")));
    }

    #[test]
    fn empty_env_falls_back_to_config() {
        let resolved = resolve_chrome_path(
            Some(OsString::new()),
            Some(Path::new("/usr/bin/chromium")),
        );
        assert_eq!(resolved, Some(PathBuf::from("/usr/bin/chromium")));
    }

    #[test]
    fn launch_args_include_debugging_profile_and_media_flags() {
        let cfg = ChromeConfig {
            cdp_port: 9333,
            user_data_dir: Some(PathBuf::from("/tmp/profile")),
            ..ChromeConfig::default()
        };
        let args: Vec<String> = launch_args(&cfg)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "--remote-debugging-port=9333",
                "--no-first-run",
                "--no-default-browser-check",
                "--user-data-dir=/tmp/profile",
                "--use-fake-device-for-media-stream",
                "--use-fake-ui-for-media-stream",
            ]
        );

        let plain = ChromeConfig {
            fake_media: false,
            ..cfg
        };
        assert_eq!(launch_args(&plain).len(), 4);
    }

    #[test]
    fn default_profile_lives_in_home() {
        let cfg = ChromeConfig::default();
        let args = launch_args(&cfg);
        let profile = args[3].to_string_lossy().into_owned();
        assert!(profile.starts_with("--user-data-dir="));
        assert!(profile.ends_with(PROFILE_DIR_NAME));
    }
}
