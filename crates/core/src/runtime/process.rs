//! Child process handling for module scripts.
//!
//! Feeding stdin, draining both output pipes and waiting for the exit status
//! happen concurrently inside one timeout, so a script that fills a pipe
//! before reading its input cannot deadlock the server.

use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Cap on captured bytes per output stream (4 MiB).
const MAX_OUTPUT_BYTES: u64 = 4 * 1024 * 1024;

/// Lines of stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Script not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Script timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Non-zero exit; `exit_code` is `-1` when killed by a signal.
    #[error("Script failed with exit code {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },

    #[error("Failed to encode script payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output of a script that exited successfully.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ScriptOutput {
    /// Stdout parsed as JSON, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(self.stdout.trim()).ok()
    }

    /// Response body for a route: JSON stdout as-is, anything else wrapped
    /// as `{"output": "..."}`.
    pub fn into_body(self) -> Value {
        match self.json() {
            Some(value) => value,
            None => json!({ "output": self.stdout }),
        }
    }
}

/// Spawn `cmd`, write `stdin` to it and collect its output.
///
/// The child is killed if `timeout` elapses first.
pub(crate) async fn run_child(
    mut cmd: Command,
    stdin: Vec<u8>,
    timeout: Duration,
) -> Result<ScriptOutput, ProcessError> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|e| spawn_error(&cmd, e))?;
    let child_stdin = child.stdin.take();
    let child_stdout = child.stdout.take();
    let child_stderr = child.stderr.take();

    let run = async {
        let feed = async move {
            if let Some(mut pipe) = child_stdin {
                // A script may exit without reading its input.
                if let Err(e) = pipe.write_all(&stdin).await {
                    if e.kind() != ErrorKind::BrokenPipe {
                        tracing::debug!(error = %e, "Could not write script stdin");
                    }
                }
            }
        };
        let ((), stdout, stderr, status) = tokio::join!(
            feed,
            read_capped(child_stdout),
            read_capped(child_stderr),
            child.wait(),
        );
        status.map(|status| (status, stdout, stderr))
    };

    let (status, stdout, stderr) = match tokio::time::timeout(timeout, run).await {
        Ok(result) => result?,
        Err(_elapsed) => {
            return Err(ProcessError::Timeout {
                elapsed_ms: elapsed_ms(start),
            })
        }
    };

    finish(status, stdout, stderr, elapsed_ms(start))
}

fn finish(
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    duration_ms: u64,
) -> Result<ScriptOutput, ProcessError> {
    let stderr = String::from_utf8_lossy(&stderr).into_owned();
    if !status.success() {
        return Err(ProcessError::Failed {
            exit_code: status.code().unwrap_or(-1),
            stderr: stderr_tail(&stderr),
        });
    }
    Ok(ScriptOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr,
        duration_ms,
    })
}

fn spawn_error(cmd: &Command, err: std::io::Error) -> ProcessError {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    match err.kind() {
        ErrorKind::NotFound => ProcessError::NotFound(program),
        ErrorKind::PermissionDenied => ProcessError::PermissionDenied(program),
        _ => ProcessError::Io(err),
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

async fn read_capped<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        if let Err(e) = pipe.take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await {
            tracing::debug!(error = %e, "Script output stream closed with an error");
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    const FIVE_SECS: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn stdin_is_echoed() {
        let output = run_child(sh("cat"), br#"{"key":"value"}"#.to_vec(), FIVE_SECS)
            .await
            .unwrap();
        assert_eq!(output.json(), Some(json!({"key": "value"})));
    }

    #[tokio::test]
    async fn plain_stdout_is_wrapped() {
        let output = run_child(sh("echo hello"), Vec::new(), FIVE_SECS)
            .await
            .unwrap();
        assert_eq!(output.into_body(), json!({"output": "hello\n"}));
    }

    #[tokio::test]
    async fn script_ignoring_stdin_succeeds() {
        let payload = vec![b'x'; 1024 * 1024];
        let output = run_child(sh("echo done"), payload, FIVE_SECS).await.unwrap();
        assert_eq!(output.stdout.trim(), "done");
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        assert_matches!(
            run_child(sh("echo oops >&2; exit 3"), Vec::new(), FIVE_SECS).await,
            Err(ProcessError::Failed { exit_code: 3, stderr }) if stderr == "oops"
        );
    }

    #[tokio::test]
    async fn timeout_kills_child() {
        assert_matches!(
            run_child(sh("sleep 10"), Vec::new(), Duration::from_millis(100)).await,
            Err(ProcessError::Timeout { .. })
        );
    }

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let cmd = Command::new("/nonexistent/program");
        assert_matches!(
            run_child(cmd, Vec::new(), FIVE_SECS).await,
            Err(ProcessError::NotFound(program)) if program == "/nonexistent/program"
        );
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let noisy: String = (0..30).map(|i| format!("line {i}\n")).collect();
        let tail = stderr_tail(&noisy);
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }
}
