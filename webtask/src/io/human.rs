//! Human channel used when a site needs manual authentication.

use std::cell::RefCell;
use std::io::{self, BufRead, Stdout, Write};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::core::auth_gate::AuthRequest;

/// Blocks until a human confirms an authentication request is done.
pub trait HumanChannel {
    fn await_authentication(&self, request: &AuthRequest) -> Result<()>;
}

/// Prints a banner and waits for Enter.
pub struct ConsoleHumanChannel<R, W> {
    input: RefCell<R>,
    output: RefCell<W>,
}

impl ConsoleHumanChannel<io::StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsoleHumanChannel<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: RefCell::new(input),
            output: RefCell::new(output),
        }
    }

    pub fn into_output(self) -> W {
        self.output.into_inner()
    }
}

pub fn render_banner(request: &AuthRequest) -> String {
    let rule = "=".repeat(60);
    format!(
        "\n{rule}\n  AUTHENTICATION REQUIRED (task {}, request #{})\n{rule}\n  {}\n\n  Complete the login in the Chrome window, then press Enter to continue...\n",
        request.task_id, request.seq, request.description
    )
}

impl<R: BufRead, W: Write> HumanChannel for ConsoleHumanChannel<R, W> {
    fn await_authentication(&self, request: &AuthRequest) -> Result<()> {
        {
            let mut out = self.output.borrow_mut();
            out.write_all(render_banner(request).as_bytes())
                .context("write authentication banner")?;
            out.flush().context("flush authentication banner")?;
        }
        let mut line = String::new();
        let read = self
            .input
            .borrow_mut()
            .read_line(&mut line)
            .context("read confirmation")?;
        if read == 0 {
            return Err(anyhow!(
                "input closed while waiting for authentication #{}",
                request.seq
            ));
        }
        info!(task_id = %request.task_id, seq = request.seq, "human confirmed authentication");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn request() -> AuthRequest {
        AuthRequest {
            task_id: "T001".to_string(),
            description: "Log in with your SSO account".to_string(),
            seq: 3,
            resolved: false,
        }
    }

    #[test]
    fn prints_banner_and_waits_for_enter() {
        let channel = ConsoleHumanChannel::new(Cursor::new(b"\n".to_vec()), Vec::new());
        channel.await_authentication(&request()).expect("confirm");
        let printed = String::from_utf8(channel.into_output()).expect("utf8");
        assert!(printed.contains("AUTHENTICATION REQUIRED (task T001, request #3)"));
        assert!(printed.contains("Log in with your SSO account"));
        assert!(printed.contains("press Enter"));
    }

    #[test]
    fn closed_input_is_an_error() {
        let channel = ConsoleHumanChannel::new(Cursor::new(Vec::new()), Vec::new());
        let err = channel.await_authentication(&request()).unwrap_err();
        assert!(err.to_string().contains("input closed"));
    }
}
