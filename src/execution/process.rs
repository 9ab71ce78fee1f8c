//! Shell subprocess execution.
//!
//! [`ShellExecutor`] runs `<shell> -c <script>`, where the script is the
//! optional prelude followed by the command. Because both run in the same
//! shell process, functions and variables defined by the prelude are visible
//! to the command.
//!
//! stdout and stderr are drained concurrently, line by line, as the process
//! produces them. Both are kept in memory in full: there is no truncation, so
//! a program that writes gigabytes of output needs that much memory here.
//!
//! A non-zero exit is reported in the [`ExecutionResult`], never as an error.
//! Classifying it is the caller's job.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::core::environment::Environment;
use crate::core::error::TaskError;

/// Shell used when none is configured.
pub const DEFAULT_SHELL: &str = "sh";

/// Everything needed to run one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSpec {
    /// Fully composed command line.
    pub command: String,
    /// Variables layered over the inherited environment.
    pub environment: Environment,
    /// Shell text run before the command in the same process.
    pub prelude: Option<String>,
    /// Working directory; inherited when unset.
    pub working_dir: Option<PathBuf>,
}

impl ExecutionSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_prelude(mut self, prelude: impl Into<String>) -> Self {
        self.prelude = Some(prelude.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// The script handed to the shell.
    pub fn script(&self) -> String {
        match &self.prelude {
            Some(prelude) if !prelude.trim().is_empty() => {
                format!("{}\n{}", prelude.trim_end(), self.command)
            }
            _ => self.command.clone(),
        }
    }
}

/// Outcome of a process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    /// stdout lines, in order, without line terminators.
    pub stdout: Vec<String>,
    /// stderr lines, in order, without line terminators.
    pub stderr: Vec<String>,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }
}

/// Runs commands through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellExecutor {
    shell: String,
    timeout: Option<Duration>,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            timeout: None,
        }
    }

    /// Kill the process and fail with [`TaskError::Timeout`] after `limit`.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `spec` and wait for the process to exit.
    pub async fn execute(&self, spec: &ExecutionSpec) -> Result<ExecutionResult, TaskError> {
        let start = Instant::now();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(spec.script());
        cmd.envs(spec.environment.iter());
        if let Some(ref dir) = spec.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Dropping the run (timeout, caller cancellation) must not leak the child.
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| TaskError::Launch {
            shell: self.shell.clone(),
            source,
        })?;
        debug!(
            pid = child.id(),
            shell = %self.shell,
            env_keys = ?spec.environment.keys().collect::<Vec<_>>(),
            "process spawned"
        );

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let run = async {
            let (out, err) = tokio::try_join!(
                read_lines(stdout, "stdout"),
                read_lines(stderr, "stderr")
            )?;
            let status = child.wait().await.map_err(TaskError::Capture)?;
            Ok::<_, TaskError>((status, out, err))
        };

        let (status, stdout, stderr) = match self.timeout {
            Some(limit) => {
                let outcome = timeout(limit, run).await;
                match outcome {
                    Ok(finished) => finished?,
                    Err(_) => {
                        warn!(?limit, "process timed out, killing it");
                        if let Err(e) = child.kill().await {
                            warn!(error = %e, "failed to kill timed out process");
                        }
                        return Err(TaskError::Timeout(limit));
                    }
                }
            }
            None => run.await?,
        };

        let exit_code = match status.code() {
            Some(code) => code,
            None => {
                warn!(%status, "process terminated without an exit code");
                -1
            }
        };
        debug!(
            exit_code,
            stdout_lines = stdout.len(),
            stderr_lines = stderr.len(),
            "process exited"
        );

        Ok(ExecutionResult {
            exit_code,
            stdout,
            stderr,
            duration: start.elapsed(),
        })
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL)
    }
}

/// Drain a pipe into lines. Invalid UTF-8 is replaced, not rejected.
async fn read_lines<R>(pipe: Option<R>, stream: &'static str) -> Result<Vec<String>, TaskError>
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return Ok(Vec::new());
    };

    let mut reader = BufReader::new(pipe);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(TaskError::Capture)?;
        if n == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        trace!(stream, "{}", line);
        lines.push(line);
    }
    Ok(lines)
}
