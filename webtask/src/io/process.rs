//! Running the agent command: prompt on stdin, bounded output, hard timeout.

use std::io::{self, Read, Write};
use std::process::{ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// One output stream of the agent, cut to a byte limit.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Bytes read past the limit and discarded.
    pub dropped: usize,
}

impl Captured {
    /// Drain `reader` to EOF, keeping at most `limit` bytes.
    fn drain<R: Read>(mut reader: R, limit: usize) -> io::Result<Self> {
        let mut captured = Self::default();
        let mut chunk = [0u8; 8192];
        loop {
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                return Ok(captured);
            }
            let keep = n.min(limit.saturating_sub(captured.bytes.len()));
            captured.bytes.extend_from_slice(&chunk[..keep]);
            captured.dropped += n - keep;
        }
    }

    fn write_section(&self, name: &str, log: &mut String) {
        log.push_str(&format!("=== {name} ===\n"));
        log.push_str(&String::from_utf8_lossy(&self.bytes));
        if self.dropped > 0 {
            log.push_str(&format!("\n[{name} truncated {} bytes]", self.dropped));
        }
        log.push('\n');
    }
}

/// How one agent turn process ended.
#[derive(Debug)]
pub struct AgentExit {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl AgentExit {
    /// Text of the per-turn `agent.log`.
    pub fn log_text(&self) -> String {
        let mut log = String::new();
        self.stdout.write_section("stdout", &mut log);
        self.stderr.write_section("stderr", &mut log);
        if self.timed_out {
            log.push_str("[agent timed out]\n");
        }
        log
    }
}

/// Spawn the agent, write `prompt` to its stdin and wait at most `timeout`.
///
/// Stdin is fed from its own thread while stdout and stderr are drained, so
/// an agent that prints before reading its prompt cannot stall on a full
/// pipe. Each stream keeps at most `output_limit_bytes`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), prompt_bytes = prompt.len()))]
pub fn run_agent(
    mut cmd: Command,
    prompt: &[u8],
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<AgentExit> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().context("spawn agent")?;
    debug!(pid = child.id(), "agent spawned");

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("agent stdin was not piped"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("agent stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("agent stderr was not piped"))?;

    let prompt = prompt.to_vec();
    let feeder = thread::spawn(move || feed_prompt(stdin, &prompt));
    let stdout = thread::spawn(move || Captured::drain(stdout, output_limit_bytes));
    let stderr = thread::spawn(move || Captured::drain(stderr, output_limit_bytes));

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for agent")? {
        Some(status) => (status, false),
        None => {
            warn!("agent exceeded its turn timeout, killing");
            child.kill().context("kill agent")?;
            (child.wait().context("reap agent")?, true)
        }
    };

    if let Err(err) = join(feeder, "stdin")? {
        debug!(err = %err, "agent did not read the whole prompt");
    }
    let stdout = join(stdout, "stdout")?.context("read agent stdout")?;
    let stderr = join(stderr, "stderr")?.context("read agent stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "agent output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "agent exited");
    Ok(AgentExit {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

/// Write the prompt and close stdin so the agent sees EOF.
fn feed_prompt(mut stdin: ChildStdin, prompt: &[u8]) -> io::Result<()> {
    stdin.write_all(prompt)
}

fn join<T>(handle: JoinHandle<T>, stream: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("agent {stream} thread panicked"))
}

/// Cut `text` to at most `limit` bytes on a char boundary, appending a
/// marker with the number of bytes dropped.
pub fn truncate_text(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[truncated {} bytes]", &text[..end], text.len() - end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[cfg(unix)]
    #[test]
    fn prompt_reaches_agent_and_output_is_bounded() {
        let exit = run_agent(
            sh("cat; echo oops >&2"),
            b"hello world",
            Duration::from_secs(5),
            5,
        )
        .expect("run");
        assert!(exit.status.success());
        assert_eq!(exit.stdout.bytes, b"hello");
        assert_eq!(exit.stdout.dropped, 6);
        assert_eq!(exit.stderr.bytes, b"oops\n");
        let log = exit.log_text();
        assert!(log.contains("[stdout truncated 6 bytes]"));
        assert!(!log.contains("[stderr truncated"));
        assert!(!exit.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn agent_printing_before_reading_a_large_prompt_finishes() {
        let prompt = vec![b'x'; 256 * 1024];
        let exit = run_agent(
            sh("head -c 262144 /dev/zero; cat >/dev/null"),
            &prompt,
            Duration::from_secs(20),
            1024,
        )
        .expect("run");
        assert!(!exit.timed_out);
        assert!(exit.status.success());
        assert_eq!(exit.stdout.bytes.len(), 1024);
        assert_eq!(exit.stdout.dropped, 256 * 1024 - 1024);
    }

    #[cfg(unix)]
    #[test]
    fn agent_ignoring_its_prompt_is_not_an_error() {
        let prompt = vec![b'x'; 256 * 1024];
        let exit = run_agent(sh("exit 0"), &prompt, Duration::from_secs(5), 1024).expect("run");
        assert!(exit.status.success());
    }

    #[cfg(unix)]
    #[test]
    fn kills_on_timeout() {
        let exit = run_agent(
            sh("exec sleep 5"),
            b"",
            Duration::from_millis(100),
            1000,
        )
        .expect("run");
        assert!(exit.timed_out);
        assert!(!exit.status.success());
        assert!(exit.log_text().ends_with("[agent timed out]\n"));
    }

    #[test]
    fn truncate_text_respects_char_boundaries() {
        assert_eq!(truncate_text("short", 10), "short");
        let cut = truncate_text("héllo", 2);
        assert!(cut.starts_with("h\n"));
        assert!(cut.ends_with("[truncated 5 bytes]"));
    }
}
