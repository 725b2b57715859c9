//! Subprocess execution with a hard wall-clock limit.
//!
//! Children run in their own process group so that on timeout the whole
//! group (shell plus anything it forked) is killed, then reaped.

use crate::error::{AppError, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Per-stream cap on captured output.
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// Variables carried into a cleared environment.
const PASSTHROUGH_ENV: &[&str] = &["PATH", "HOME", "LANG", "LC_ALL", "TMPDIR", "SYSTEMROOT"];

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    clear_env: bool,
    env: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            clear_env: false,
            env: Vec::new(),
            stdin: None,
            timeout,
        }
    }

    /// `sh -c <command>`.
    pub fn shell(command: &str, timeout: Duration) -> Self {
        Self::new("sh", timeout).arg("-c").arg(command)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Start from an empty environment (plus `PATH`, `HOME` and locale).
    pub fn clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        if self.clear_env {
            cmd.env_clear();
            for key in PASSTHROUGH_ENV {
                if let Ok(value) = std::env::var(key) {
                    cmd.env(key, value);
                }
            }
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutput {
    /// None when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    #[serde(serialize_with = "lossy")]
    pub stdout: Vec<u8>,
    #[serde(serialize_with = "lossy")]
    pub stderr: Vec<u8>,
    pub elapsed_ms: u64,
}

fn lossy<S: serde::Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Last `lines` lines of stderr.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let text = self.stderr_text();
        let all: Vec<&str> = text.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Run `spec` to completion or kill it when the timeout expires.
///
/// Spawn failures are `CapabilityError`; expiry is `TimeoutError` and the
/// child's process group is gone by the time it is returned.
pub async fn run(spec: ProcessSpec) -> Result<ProcessOutput> {
    let start = Instant::now();
    let mut child = spec.command().spawn().map_err(|e| {
        AppError::CapabilityError(format!("Failed to start '{}': {}", spec.program, e))
    })?;

    if let (Some(input), Some(mut pipe)) = (spec.stdin.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            // A child that exits without reading stdin closes the pipe; that is not an error here.
            let _ = pipe.write_all(&input).await;
            let _ = pipe.shutdown().await;
        });
    }

    let stdout = child.stdout.take().map(|pipe| tokio::spawn(read_capped(pipe)));
    let stderr = child.stderr.take().map(|pipe| tokio::spawn(read_capped(pipe)));

    let status = match tokio::time::timeout(spec.timeout, child.wait()).await {
        Ok(status) => status.map_err(|e| {
            AppError::CapabilityError(format!("Failed to wait for '{}': {}", spec.program, e))
        })?,
        Err(_) => {
            terminate(&mut child).await;
            if let Some(task) = stdout {
                task.abort();
            }
            if let Some(task) = stderr {
                task.abort();
            }
            tracing::warn!(
                program = %spec.program,
                timeout_secs = spec.timeout.as_secs(),
                "Subprocess timed out and was killed"
            );
            return Err(AppError::TimeoutError(format!(
                "'{}' exceeded {}s limit and was terminated",
                spec.program,
                spec.timeout.as_secs()
            )));
        }
    };

    let stdout = collect(stdout).await;
    let stderr = collect(stderr).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    tracing::debug!(
        program = %spec.program,
        exit_code = ?status.code(),
        elapsed_ms,
        "Subprocess finished"
    );

    Ok(ProcessOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        elapsed_ms,
    })
}

async fn read_capped<R: tokio::io::AsyncRead + Unpin>(mut pipe: R) -> Vec<u8> {
    let mut captured = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = MAX_CAPTURE_BYTES.saturating_sub(captured.len());
                captured.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    captured
}

/// Pipe contents after the child exited. A background grandchild can keep
/// the pipe open, so reading stops after a short grace period.
async fn collect(task: Option<tokio::task::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    let Some(mut task) = task else {
        return Vec::new();
    };
    match tokio::time::timeout(Duration::from_secs(2), &mut task).await {
        Ok(result) => result.unwrap_or_default(),
        Err(_) => {
            task.abort();
            Vec::new()
        }
    }
}

async fn terminate(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: killpg has no memory-safety preconditions; the group id is
            // the child's pid because it was spawned with process_group(0).
            unsafe {
                libc::killpg(pid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "Child already exited before kill");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_exit_code_and_streams() {
        let out = run(ProcessSpec::shell(
            "echo out; echo err 1>&2; exit 3",
            Duration::from_secs(5),
        ))
        .await
        .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout_text(), "out\n");
        assert_eq!(out.stderr_text(), "err\n");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let out = run(ProcessSpec::new("cat", Duration::from_secs(5)).stdin(b"ping".to_vec()))
            .await
            .unwrap();
        assert_eq!(out.stdout, b"ping");
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let start = Instant::now();
        let err = run(ProcessSpec::shell("sleep 30", Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TimeoutError(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cleared_env_hides_parent_vars() {
        let out = run(ProcessSpec::shell(
            "echo \"[$CARGO_PKG_NAME][$VISIBLE]\"",
            Duration::from_secs(5),
        )
        .clear_env()
        .env("VISIBLE", "yes"))
        .await
        .unwrap();
        assert_eq!(out.stdout_text(), "[][yes]\n");
    }

    #[tokio::test]
    async fn test_missing_program_is_capability_error() {
        let err = run(ProcessSpec::new("definitely-not-a-program-xyz", Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CapabilityError(_)));
    }

    #[test]
    fn test_stderr_tail() {
        let out = ProcessOutput {
            exit_code: Some(1),
            stdout: Vec::new(),
            stderr: b"a\nb\nc\nd\n".to_vec(),
            elapsed_ms: 0,
        };
        assert_eq!(out.stderr_tail(2), "c\nd");
    }
}
