use std::{
    io,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use async_trait::async_trait;
use cmdrelay_dispatch::Invocation;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command, time::timeout};

const MAX_STDERR_BYTES: usize = 4_096;

/// Failures while running an invocation.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The process could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying OS error.
        source: io::Error,
    },
    /// Writing the stdin payload failed.
    #[error("failed to write stdin: {0}")]
    Stdin(#[source] io::Error),
    /// Collecting the process output failed.
    #[error("failed to collect output: {0}")]
    Wait(#[source] io::Error),
    /// The process exited unsuccessfully.
    #[error("{program} failed with {status}: {stderr}")]
    NonZeroExit {
        /// Program that failed.
        program: String,
        /// Exit status reported by the OS.
        status: ExitStatus,
        /// Captured standard error (truncated).
        stderr: String,
    },
    /// The process outlived the configured timeout and was killed.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

/// Runs invocations and returns their standard output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Executes the invocation to completion.
    async fn run(&self, invocation: Invocation) -> Result<Vec<u8>, ExecError>;
}

/// Spawns local processes with `tokio::process`.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    timeout: Duration,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl ProcessExecutor {
    /// Creates an executor that kills processes running longer than `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessExecutor {
    async fn run(&self, invocation: Invocation) -> Result<Vec<u8>, ExecError> {
        let program = invocation.program().to_string();
        let (argv, payload) = invocation.into_parts();

        let mut command = Command::new(&program);
        command.args(&argv[1..]);
        command.stdin(if payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| ExecError::Spawn {
            program: program.clone(),
            source,
        })?;

        // The pipe is owned by `feed` and closed when it finishes, on every path.
        let pipe = child.stdin.take();
        let feed = async move {
            let (Some(mut pipe), Some(payload)) = (pipe, payload) else {
                return Ok(());
            };
            let written = pipe.write_all(payload.as_bytes()).await;
            let closed = pipe.shutdown().await;
            match written.and(closed) {
                Err(err) if err.kind() != io::ErrorKind::BrokenPipe => Err(err),
                _ => Ok(()),
            }
        };

        let (fed, output) = timeout(self.timeout, async move {
            tokio::join!(feed, child.wait_with_output())
        })
        .await
        .map_err(|_| ExecError::Timeout(self.timeout))?;

        let output = output.map_err(ExecError::Wait)?;
        fed.map_err(ExecError::Stdin)?;
        if !output.status.success() {
            return Err(ExecError::NonZeroExit {
                program,
                status: output.status,
                stderr: truncate_lossy(&output.stderr, MAX_STDERR_BYTES),
            });
        }
        Ok(output.stdout)
    }
}

fn truncate_lossy(bytes: &[u8], limit: usize) -> String {
    let mut text = String::from_utf8_lossy(bytes).trim_end().to_string();
    if text.len() > limit {
        let mut cut = limit;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...[truncated]");
    }
    text
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn invocation(argv: &[&str], stdin: Option<&str>) -> Invocation {
        Invocation::new(
            argv.iter().map(ToString::to_string).collect(),
            stdin.map(str::to_string),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn captures_stdout() {
        let out = ProcessExecutor::default()
            .run(invocation(&["echo", "hi", "there"], None))
            .await
            .unwrap();
        assert_eq!(out, b"hi there\n");
    }

    #[tokio::test]
    async fn streams_stdin_to_child() {
        let out = ProcessExecutor::default()
            .run(invocation(&["cat"], Some("some remaining   text")))
            .await
            .unwrap();
        assert_eq!(out, b"some remaining   text");
    }

    #[tokio::test]
    async fn large_stdin_does_not_deadlock() {
        let payload = "x".repeat(1 << 20);
        let out = ProcessExecutor::new(Duration::from_secs(30))
            .run(invocation(&["cat"], Some(&payload)))
            .await
            .unwrap();
        assert_eq!(out.len(), payload.len());
    }

    #[tokio::test]
    async fn reports_non_zero_exit() {
        let err = ProcessExecutor::default()
            .run(invocation(&["sh", "-c", "echo oops >&2; exit 3"], None))
            .await
            .unwrap_err();
        match err {
            ExecError::NonZeroExit { status, stderr, .. } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn reports_missing_binary() {
        let err = ProcessExecutor::default()
            .run(invocation(&["cmdrelay-definitely-missing-binary"], None))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[tokio::test]
    async fn kills_process_after_timeout() {
        let err = ProcessExecutor::new(Duration::from_millis(100))
            .run(invocation(&["sleep", "5"], None))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout(_)));
    }

    #[test]
    fn truncates_on_char_boundary() {
        let text = truncate_lossy("ééé".as_bytes(), 3);
        assert_eq!(text, "é...[truncated]");
    }
}
