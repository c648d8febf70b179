//! Executor - One Blocking Tool Run Per Call
//!
//! Only the termination status is captured. The tool's own stdout/stderr are
//! inherited and stay the diagnostic channel. Failures are never retried.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

use crate::pipeline::CompiledInvocation;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("Tool exited with status {0}")]
    ExitCode(i32),

    #[error("Tool was terminated by a signal")]
    Terminated,
}

/// Success, or why the destination was not refreshed
pub type ExecutionResult = Result<(), ExecutionError>;

/// How the external process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signalled,
}

/// Process boundary. Implementations must block until the tool has ended.
pub trait ToolRunner {
    fn run(&mut self, program: &Path, args: &[OsString]) -> io::Result<Termination>;
}

/// Spawns the real tool with inherited working directory and stdio
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&mut self, program: &Path, args: &[OsString]) -> io::Result<Termination> {
        let status = Command::new(program).args(args).status()?;
        Ok(match status.code() {
            Some(code) => Termination::Exited(code),
            None => Termination::Signalled,
        })
    }
}

pub struct Executor<R: ToolRunner = ProcessRunner> {
    runner: R,
}

impl Executor<ProcessRunner> {
    pub fn process() -> Self {
        Self::new(ProcessRunner)
    }
}

impl<R: ToolRunner> Executor<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run the invocation once; exit code 0 is success, anything else fails.
    pub fn execute(&mut self, invocation: &CompiledInvocation) -> ExecutionResult {
        let tool = invocation.tool();
        tracing::info!(
            tool = %tool.display(),
            stages = invocation.stages().len(),
            "Running tool"
        );

        let termination = self
            .runner
            .run(tool, &invocation.args_os())
            .map_err(|source| ExecutionError::Spawn {
                tool: tool.display().to_string(),
                source,
            });

        let result = match termination {
            Ok(Termination::Exited(0)) => Ok(()),
            Ok(Termination::Exited(code)) => Err(ExecutionError::ExitCode(code)),
            Ok(Termination::Signalled) => Err(ExecutionError::Terminated),
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => tracing::debug!(tool = %tool.display(), "Tool finished"),
            Err(e) => tracing::warn!(tool = %tool.display(), error = %e, "Tool run failed"),
        }
        result
    }
}
