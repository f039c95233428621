//! External process execution. The one place in the crate that actually
//! shells out — every adapter in [`crate::adapters`] is built on top of it.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use ctnr_core::error::{CtnrError, ErrorCode, ErrorDomain, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// One external-process invocation: argv, working directory, environment,
/// and anything to feed on stdin.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            stdin: None,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Races this invocation against `cancel`: a signal mid-flight kills the
    /// child (via `start_kill`, same path as a timeout) and the call returns
    /// `ErrorCode::Cancelled` instead of waiting for the deadline (§4.2, §5).
    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdin(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Some(bytes);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of running a command to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Runs external executables with deadline-aware cancellation.
///
/// Never retries — retry policy lives entirely in the orchestrator and the
/// per-step `RetryPolicy`. Default timeout (5 minutes) matches the
/// orchestrator's per-step deadline; callers needing longer (build, scan)
/// pass their own via [`CommandSpec::timeout`].
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    default_timeout: Duration,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self {
            default_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout: timeout,
        }
    }

    fn build_command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        cmd
    }

    /// Run to completion, buffering stdout/stderr.
    pub async fn run(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let deadline = spec.timeout.unwrap_or(self.default_timeout);
        let program = spec.program.clone();
        let start = Instant::now();

        let mut cmd = Self::build_command(&spec);
        let mut child = cmd.spawn().map_err(|e| {
            CtnrError::new(
                ErrorCode::IoError,
                ErrorDomain::Command,
                format!("failed to spawn {program}: {e}"),
            )
        })?;

        if let Some(bytes) = spec.stdin.clone() {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(&bytes).await;
            }
        }

        let run = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            if let Some(mut out) = child.stdout.take() {
                let _ = out.read_to_end(&mut stdout).await;
            }
            if let Some(mut err) = child.stderr.take() {
                let _ = err.read_to_end(&mut stderr).await;
            }
            let status = child.wait().await.map_err(|e| {
                CtnrError::new(ErrorCode::IoError, ErrorDomain::Command, format!("{program}: {e}"))
            })?;
            Ok::<_, CtnrError>((stdout, stderr, status))
        };

        tokio::select! {
            result = tokio::time::timeout(deadline, run) => match result {
                Ok(Ok((stdout, stderr, status))) => Ok(CommandOutput {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                    elapsed: start.elapsed(),
                }),
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    let _ = child.start_kill();
                    Err(CtnrError::timeout(
                        ErrorDomain::Command,
                        format!("{program} timed out after {deadline:?}"),
                        start.elapsed(),
                    )
                    .with_context("program", program.clone()))
                }
            },
            _ = spec.cancel.cancelled() => {
                let _ = child.start_kill();
                Err(CtnrError::cancelled(ErrorDomain::Command, format!("{program} cancelled"))
                    .with_context("program", program.clone()))
            }
        }
    }

    /// Run while streaming stdout/stderr chunks to `sink` as they arrive.
    /// Still returns the full buffered output on completion.
    pub async fn run_streaming(
        &self,
        spec: CommandSpec,
        sink: UnboundedSender<Vec<u8>>,
    ) -> Result<CommandOutput> {
        let deadline = spec.timeout.unwrap_or(self.default_timeout);
        let program = spec.program.clone();
        let start = Instant::now();

        let mut cmd = Self::build_command(&spec);
        let mut child = cmd.spawn().map_err(|e| {
            CtnrError::new(
                ErrorCode::IoError,
                ErrorDomain::Command,
                format!("failed to spawn {program}: {e}"),
            )
        })?;

        if let Some(bytes) = spec.stdin.clone() {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(&bytes).await;
            }
        }

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let run = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut buf = [0u8; 4096];

            loop {
                if stdout_pipe.is_none() && stderr_pipe.is_none() {
                    break;
                }
                tokio::select! {
                    n = async {
                        match &mut stdout_pipe {
                            Some(p) => p.read(&mut buf).await,
                            None => std::future::pending().await,
                        }
                    } => {
                        match n {
                            Ok(0) | Err(_) => stdout_pipe = None,
                            Ok(n) => {
                                stdout.extend_from_slice(&buf[..n]);
                                let _ = sink.send(buf[..n].to_vec());
                            }
                        }
                    }
                    n = async {
                        match &mut stderr_pipe {
                            Some(p) => p.read(&mut buf).await,
                            None => std::future::pending().await,
                        }
                    } => {
                        match n {
                            Ok(0) | Err(_) => stderr_pipe = None,
                            Ok(n) => {
                                stderr.extend_from_slice(&buf[..n]);
                                let _ = sink.send(buf[..n].to_vec());
                            }
                        }
                    }
                }
            }

            let status = child.wait().await.map_err(|e| {
                CtnrError::new(ErrorCode::IoError, ErrorDomain::Command, format!("{program}: {e}"))
            })?;
            Ok::<_, CtnrError>((stdout, stderr, status))
        };

        tokio::select! {
            result = tokio::time::timeout(deadline, run) => match result {
                Ok(Ok((stdout, stderr, status))) => Ok(CommandOutput {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                    elapsed: start.elapsed(),
                }),
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    let _ = child.start_kill();
                    Err(CtnrError::timeout(
                        ErrorDomain::Command,
                        format!("{program} timed out after {deadline:?}"),
                        start.elapsed(),
                    ))
                }
            },
            _ = spec.cancel.cancelled() => {
                let _ = child.start_kill();
                Err(CtnrError::cancelled(ErrorDomain::Command, format!("{program} cancelled")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_echo_successfully() {
        let runner = CommandRunner::new();
        let spec = CommandSpec::new("echo").arg("hello");
        let out = runner.run(spec).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout_string().trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_an_error() {
        let runner = CommandRunner::new();
        let spec = CommandSpec::new("sh").args(["-c", "exit 7"]);
        let out = runner.run(spec).await.unwrap();
        assert_eq!(out.exit_code, 7);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn timeout_kills_and_returns_timeout_error() {
        let runner = CommandRunner::new();
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(50));
        let err = runner.run(spec).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let runner = CommandRunner::new();
        let spec = CommandSpec::new("ctnr-definitely-not-a-real-binary");
        let err = runner.run(spec).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::IoError);
    }

    #[tokio::test]
    async fn cancellation_kills_the_child_before_the_deadline() {
        let runner = CommandRunner::new();
        let cancel = CancellationToken::new();
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .timeout(Duration::from_secs(5))
            .cancel(cancel.clone());

        let handle = tokio::spawn(async move { runner.run(spec).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let err = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("cancellation should win long before the 5s deadline")
            .unwrap()
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
    }
}
