pub mod diff;
pub mod log;
pub mod status;
pub mod tracked;

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::GitError;

/// Default upper bound for a single git invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Subprocess binding to the `git` executable.
///
/// Every invocation carries a finite timeout; a stuck git process is killed
/// rather than allowed to hold up an aggregation.
#[derive(Debug, Clone)]
pub struct Git {
    timeout: Duration,
}

impl Default for Git {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Git {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(&self, cwd: &Path, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        // quotepath=off: non-ASCII file names come back verbatim, not octal-escaped.
        cmd.arg("-c")
            .arg("core.quotepath=off")
            .args(args)
            .current_dir(cwd)
            .env("GIT_OPTIONAL_LOCKS", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Run git in `cwd` and return stdout.
    ///
    /// Non-zero exit, spawn failure and timeout are all errors.
    pub async fn run(&self, cwd: &Path, args: &[&str]) -> Result<String, GitError> {
        let command = args.first().copied().unwrap_or_default().to_string();
        let mut cmd = self.command(cwd, args);
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(GitError::Timeout {
                    command,
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(GitError::Exit {
                command,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Like [`Git::run`], but any failure yields an empty string.
    pub async fn run_or_empty(&self, cwd: &Path, args: &[&str]) -> String {
        match self.run(cwd, args).await {
            Ok(stdout) => stdout,
            Err(err) => {
                debug!(cwd = %cwd.display(), error = %err, "git invocation failed");
                String::new()
            }
        }
    }

    /// Run git and feed stdout to `on_line` one line at a time.
    ///
    /// Returning `ControlFlow::Break` from the callback kills the process
    /// early; that is a success, not an error. The timeout covers the whole
    /// stream.
    pub async fn stream_lines<F>(
        &self,
        cwd: &Path,
        args: &[&str],
        mut on_line: F,
    ) -> Result<(), GitError>
    where
        F: FnMut(&str) -> ControlFlow<()>,
    {
        let command = args.first().copied().unwrap_or_default().to_string();
        let mut child = self
            .command(cwd, args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GitError::Spawn(std::io::Error::other("stdout was not captured")))?;

        let read = async {
            let mut segments = BufReader::new(stdout).split(b'\n');
            while let Some(segment) = segments.next_segment().await? {
                let line = String::from_utf8_lossy(&segment);
                if on_line(line.trim_end_matches('\r')).is_break() {
                    return Ok::<bool, std::io::Error>(true);
                }
            }
            Ok(false)
        };

        match tokio::time::timeout(self.timeout, read).await {
            Err(_) => {
                let _ = child.kill().await;
                Err(GitError::Timeout {
                    command,
                    timeout: self.timeout,
                })
            }
            Ok(Err(err)) => {
                let _ = child.kill().await;
                Err(err.into())
            }
            Ok(Ok(true)) => {
                let _ = child.kill().await;
                Ok(())
            }
            Ok(Ok(false)) => {
                let status = child.wait().await?;
                if status.success() {
                    Ok(())
                } else {
                    Err(GitError::Exit {
                        command,
                        status: status.code().unwrap_or(-1),
                        stderr: String::new(),
                    })
                }
            }
        }
    }

    /// Work-tree root of the repository containing `dir`, if any.
    pub async fn show_toplevel(&self, dir: &Path) -> Option<PathBuf> {
        let stdout = self
            .run(dir, &["rev-parse", "--show-toplevel"])
            .await
            .ok()?;
        let top = stdout.trim();
        if top.is_empty() {
            return None;
        }
        let top = PathBuf::from(top);
        Some(top.canonicalize().unwrap_or(top))
    }
}
