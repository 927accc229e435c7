//! External command execution.
//!
//! The scanner never spawns processes directly; it goes through a
//! [`CommandRunner`] so tests can replay canned `npm` output.

use crate::error::OperationError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured result of a finished command. A non-zero status is not an error
/// at this level; `npm audit` and `npm outdated` both exit non-zero while
/// writing valid JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program args...` in `cwd`, failing with
    /// [`OperationError::Timeout`] if it has not exited within `timeout`.
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, OperationError>;
}

/// Runs commands as child processes.
///
/// Children are spawned with `kill_on_drop`, so a process still running when
/// its timeout fires, or when the whole scan is abandoned, is killed rather
/// than left behind.
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, OperationError> {
        let command_line = format!("{} {}", program, args.join(" "));

        let child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| OperationError::Spawn {
                program: program.to_string(),
                source,
            })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(source)) => Err(OperationError::Io {
                path: cwd.to_path_buf(),
                source,
            }),
            Err(_) => Err(OperationError::Timeout {
                command: command_line,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}
