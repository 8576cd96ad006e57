use anyhow::{Context, Result};
use std::process::{Command, Output, Stdio};

/// Result of a command execution.
#[derive(Debug)]
pub struct ExecResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit status was zero.
    pub success: bool,
    /// Exit code, `None` if killed by a signal.
    pub code: Option<i32>,
}

impl From<Output> for ExecResult {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

/// Abstraction over process execution so the engine can be tested without
/// spawning real tools.
pub trait Executor: Send + Sync + std::fmt::Debug {
    /// Run a command and capture its output, allowing failure.
    ///
    /// # Errors
    ///
    /// Returns an error only if the program cannot be started.
    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Run a command attached to the terminal and return its exit code
    /// (`None` when killed by a signal).
    ///
    /// # Errors
    ///
    /// Returns an error only if the program cannot be started.
    fn run_interactive(&self, program: &str, args: &[&str]) -> Result<Option<i32>>;
}

/// Production [`Executor`] that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to execute: {program}"))?;

        Ok(ExecResult::from(output))
    }

    fn run_interactive(&self, program: &str, args: &[&str]) -> Result<Option<i32>> {
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| format!("failed to execute: {program}"))?;
        Ok(status.code())
    }
}
