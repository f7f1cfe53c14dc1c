//! External command execution, locally or on a remote host over ssh.

use crate::utils::errors::{Result, SnapError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What to do with a line of child output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAction {
    Continue,
    /// Kill the child, the run fails
    Abort,
}

/// Runs commands, wrapping them in ssh for remote hosts.
#[derive(Debug, Clone, Default)]
pub struct Shell {
    ssh_key: Option<PathBuf>,
    cancel: CancellationToken,
}

impl Shell {
    pub fn new(ssh_key: Option<PathBuf>) -> Self {
        Self {
            ssh_key,
            cancel: CancellationToken::new(),
        }
    }

    /// Same shell, with running commands killed once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn ssh_key(&self) -> Option<&Path> {
        self.ssh_key.as_deref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// rsync `-e` value selecting the identity file, if any.
    pub fn rsync_ssh_transport(&self) -> Option<String> {
        self.ssh_key
            .as_ref()
            .map(|key| format!("ssh -i {}", shell_quote(&key.to_string_lossy())))
    }

    /// Build `program args...`, run directly or as `ssh [-i key] -q host '...'`.
    pub fn command<S: AsRef<str>>(&self, host: Option<&str>, program: &str, args: &[S]) -> Command {
        match host {
            None => {
                let mut cmd = Command::new(program);
                cmd.args(args.iter().map(AsRef::as_ref));
                cmd
            }
            Some(host) => {
                let mut remote = shell_quote(program);
                for arg in args {
                    remote.push(' ');
                    remote.push_str(&shell_quote(arg.as_ref()));
                }
                let mut cmd = Command::new("ssh");
                if let Some(key) = &self.ssh_key {
                    cmd.arg("-i").arg(key);
                }
                cmd.arg("-q").arg(host).arg(remote);
                cmd
            }
        }
    }

    /// Run to completion and return the non-empty output lines.
    ///
    /// # Errors
    /// `Command` on a non-zero exit status, `Cancelled` when cancelled.
    pub async fn run<S: AsRef<str>>(&self, host: Option<&str>, program: &str, args: &[S]) -> Result<Vec<String>> {
        let cmd = self.command(host, program, args);
        self.run_streaming(cmd, |_| LineAction::Continue).await
    }

    /// Run `cmd`, feeding each stdout/stderr line to `on_line` as it arrives.
    pub async fn run_streaming<F>(&self, mut cmd: Command, mut on_line: F) -> Result<Vec<String>>
    where
        F: FnMut(&str) -> LineAction,
    {
        let command_line = describe(&cmd);
        debug!(command = %command_line, "Running");

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SnapError::Command {
                command: command_line.clone(),
                status: "spawn failed".to_string(),
                output: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| SnapError::Sync("no stdout pipe".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| SnapError::Sync("no stderr pipe".into()))?;
        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let (mut out_done, mut err_done) = (false, false);

        let mut output = Vec::new();
        let mut aborted = false;

        while !(out_done && err_done) {
            let line = tokio::select! {
                line = out_lines.next_line(), if !out_done => {
                    let line = line?;
                    out_done = line.is_none();
                    line
                }
                line = err_lines.next_line(), if !err_done => {
                    let line = line?;
                    err_done = line.is_none();
                    line
                }
                _ = self.cancel.cancelled() => {
                    terminate(&mut child).await;
                    return Err(SnapError::Cancelled);
                }
            };

            let Some(line) = line else { continue };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            output.push(line.to_string());
            if on_line(line) == LineAction::Abort {
                warn!(command = %command_line, line, "Aborting command");
                terminate(&mut child).await;
                aborted = true;
                break;
            }
        }

        let status = child.wait().await?;
        if aborted || !status.success() {
            return Err(SnapError::Command {
                command: command_line,
                status: if aborted { "aborted".to_string() } else { status.to_string() },
                output: output.join("\n >> "),
            });
        }
        Ok(output)
    }
}

/// Ask the child to stop with SIGTERM, then make sure it is gone.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok() {
            let grace = tokio::time::Duration::from_secs(5);
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return;
            }
        }
    }
    if let Err(e) = child.kill().await {
        warn!("Failed to kill child process: {}", e);
    }
}

fn describe(cmd: &Command) -> String {
    let std_cmd = cmd.as_std();
    let mut parts = vec![std_cmd.get_program().to_string_lossy().to_string()];
    parts.extend(std_cmd.get_args().map(|a| a.to_string_lossy().to_string()));
    parts.join(" ")
}

/// Quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || b"/._-=+:@,%".contains(&b));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
