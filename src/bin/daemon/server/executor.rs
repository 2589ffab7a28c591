//! Command Executor Module
//!
//! Runs one command through the host shell and captures its standard output.
//! Capture is bounded; output past the capacity is drained and dropped, and
//! the result says so.

use crate::utils::error::{RexecError, Result};
use async_std::task;
use rexec::protocol::SENTINEL;
use std::ffi::OsStr;
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

/// Size of each read from the subprocess pipe
const READ_CHUNK: usize = 4096;

/// Captured output of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, at most `capacity` bytes, sentinel bytes removed
    pub stdout: Vec<u8>,
    /// True when the subprocess wrote more than the capacity
    pub truncated: bool,
    /// Exit status, when the subprocess could be waited on
    pub status: Option<ExitStatus>,
}

/// Shell command runner shared by all workers
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: PathBuf,
    capacity: usize,
}

impl CommandExecutor {
    /// Create an executor
    ///
    /// # Arguments
    /// * `shell` - Shell invoked as `<shell> -c <command>`
    /// * `capacity` - Maximum captured output bytes
    pub fn new(shell: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            shell: shell.into(),
            capacity,
        }
    }

    /// Run a command and capture its output
    ///
    /// The subprocess runs on the blocking pool so only the calling worker
    /// waits for it. Only a failure to start the subprocess is an error; a
    /// command that runs and fails yields whatever it printed.
    pub async fn run(&self, command: &[u8]) -> Result<CommandOutput> {
        let shell = self.shell.clone();
        let capacity = self.capacity;
        let command = command.to_vec();

        task::spawn_blocking(move || run_blocking(&shell, &command, capacity)).await
    }
}

fn run_blocking(shell: &Path, command: &[u8], capacity: usize) -> Result<CommandOutput> {
    let spawn_error = |source: io::Error| RexecError::Spawn {
        command: String::from_utf8_lossy(command).into_owned(),
        source,
    };

    let mut child = Command::new(shell)
        .arg("-c")
        .arg(OsStr::from_bytes(command))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(spawn_error)?;

    let (stdout, truncated) = match child.stdout.take() {
        Some(pipe) => capture(pipe, capacity),
        None => (Vec::new(), false),
    };

    // Always wait so the subprocess never lingers as a zombie
    let status = match child.wait() {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to wait for command subprocess");
            None
        }
    };

    Ok(CommandOutput {
        stdout,
        truncated,
        status,
    })
}

/// Read a stream to its end, keeping at most `capacity` bytes
fn capture(mut source: impl Read, capacity: usize) -> (Vec<u8>, bool) {
    let mut captured = Vec::with_capacity(capacity.min(READ_CHUNK));
    let mut truncated = false;
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let read = match source.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Reading command output failed");
                break;
            }
        };

        for &byte in chunk.iter().take(read) {
            if byte == SENTINEL {
                continue;
            }
            if captured.len() < capacity {
                captured.push(byte);
            } else {
                truncated = true;
            }
        }
    }

    (captured, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_under_capacity() {
        let (data, truncated) = capture(&b"hello\n"[..], 100);
        assert_eq!(data, b"hello\n");
        assert!(!truncated);
    }

    #[test]
    fn test_capture_flags_truncation() {
        let input = vec![b'z'; 10_000];
        let (data, truncated) = capture(&input[..], 5000);
        assert_eq!(data.len(), 5000);
        assert!(truncated);
    }

    #[test]
    fn test_capture_exact_capacity_is_not_truncated() {
        let (data, truncated) = capture(&b"abcd"[..], 4);
        assert_eq!(data, b"abcd");
        assert!(!truncated);
    }

    #[test]
    fn test_capture_drops_sentinel_bytes() {
        let (data, truncated) = capture(&b"a\0b\0"[..], 10);
        assert_eq!(data, b"ab");
        assert!(!truncated);
    }

    #[async_std::test]
    async fn test_run_echo() {
        let executor = CommandExecutor::new("/bin/sh", 5000);
        let output = executor.run(b"echo hello").await.unwrap();
        assert_eq!(output.stdout, b"hello\n");
        assert!(!output.truncated);
        assert!(output.status.unwrap().success());
    }

    /// A failing command is not an executor error
    #[async_std::test]
    async fn test_run_failing_command_returns_output() {
        let executor = CommandExecutor::new("/bin/sh", 5000);
        let output = executor.run(b"echo partial; exit 3").await.unwrap();
        assert_eq!(output.stdout, b"partial\n");
        assert_eq!(output.status.unwrap().code(), Some(3));
    }

    #[async_std::test]
    async fn test_run_no_output() {
        let executor = CommandExecutor::new("/bin/sh", 5000);
        let output = executor.run(b"true").await.unwrap();
        assert!(output.stdout.is_empty());
        assert!(!output.truncated);
    }

    #[async_std::test]
    async fn test_stderr_is_not_captured() {
        let executor = CommandExecutor::new("/bin/sh", 5000);
        let output = executor.run(b"echo out; echo err 1>&2").await.unwrap();
        assert_eq!(output.stdout, b"out\n");
    }

    #[async_std::test]
    async fn test_run_truncates_large_output() {
        let executor = CommandExecutor::new("/bin/sh", 100);
        let output = executor
            .run(b"i=0; while [ $i -lt 200 ]; do echo line$i; i=$((i+1)); done")
            .await
            .unwrap();
        assert_eq!(output.stdout.len(), 100);
        assert!(output.truncated);
        assert!(output.stdout.starts_with(b"line0\nline1\n"));
    }

    #[async_std::test]
    async fn test_missing_shell_is_spawn_error() {
        let executor = CommandExecutor::new("/nonexistent/shell", 5000);
        match executor.run(b"echo hi").await {
            Err(RexecError::Spawn { command, .. }) => assert_eq!(command, "echo hi"),
            other => panic!("Expected Spawn error, got {:?}", other),
        }
    }
}
