//! Execution of the external command-line tools.
//!
//! Every tool is started with a structured argument list, never through a
//! shell. [`ProcessRunner`] waits for the child under a timeout and folds
//! the outcome into a [`StageResult`]; it never returns an error to its
//! caller. The [`ToolRunner`] trait is the seam the pipeline is written
//! against, so tests can substitute a scripted runner.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::FailureReason;

/// One external command: the program and its verbatim arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Appends a `-flag value` pair, the option style shared by the OpenMS tools.
    pub fn opt(self, flag: &str, value: impl AsRef<OsStr>) -> Self {
        self.arg(flag).arg(value)
    }

    pub fn path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Arguments as strings, for logs and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult {
    Success { output: String },
    Failure { reason: FailureReason, output: String },
}

impl StageResult {
    pub fn success(output: impl Into<String>) -> Self {
        StageResult::Success {
            output: output.into(),
        }
    }

    pub fn failure(reason: FailureReason, output: impl Into<String>) -> Self {
        StageResult::Failure {
            reason,
            output: output.into(),
        }
    }

    /// Applies the shared success rule: exit code zero and something on
    /// stdout or stderr. `code` is `None` when the child was killed by a signal.
    pub fn classify(code: Option<i32>, output: String) -> Self {
        match code {
            Some(0) if output.trim().is_empty() => {
                Self::failure(FailureReason::EmptyOutput, output)
            }
            Some(0) => Self::success(output),
            Some(code) => Self::failure(FailureReason::ExitStatus(code), output),
            None => Self::failure(FailureReason::Signal, output),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success { .. })
    }

    /// Captured stdout followed by stderr.
    pub fn output(&self) -> &str {
        match self {
            StageResult::Success { output } | StageResult::Failure { output, .. } => output,
        }
    }
}

/// Runs external tools on behalf of the pipeline stages.
pub trait ToolRunner {
    async fn run(&self, invocation: &Invocation) -> StageResult;
}

/// [`ToolRunner`] backed by real child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> StageResult {
        debug!(command = %invocation, "starting tool");

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return StageResult::failure(
                    FailureReason::Spawn(format!("{}: {e}", invocation.program_name())),
                    String::new(),
                );
            }
        };

        // Dropping the child on timeout kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return StageResult::failure(FailureReason::Io(e.to_string()), String::new());
            }
            Err(_) => {
                return StageResult::failure(FailureReason::Timeout(self.timeout), String::new());
            }
        };

        let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));
        trace!(command = %invocation, output = %captured, "tool output");

        let result = StageResult::classify(output.status.code(), captured);
        if !result.is_success() {
            debug!(command = %invocation, output = %result.output().trim_end(), "tool failed");
        }
        result
    }
}
