//! Runner module - executes one submission against one testcase
//!
//! The runner does NOT:
//! - Compare outputs against expected answers
//! - Know about jobs, submissions or scoring
//!
//! Isolation is a fresh working directory per run plus a wall-clock deadline
//! enforced by killing the child. The memory limit is part of the contract
//! but is not enforced yet.

pub mod interpreter;

use std::time::Duration;

use async_trait::async_trait;

use crate::core::Verdict;
use crate::error::ExecutionError;

pub use interpreter::InterpreterRunner;

/// Resource limits for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Wall-clock limit
    pub time_limit: Duration,
    /// Accepted but not enforced
    pub memory_limit_bytes: u64,
}

impl RunLimits {
    pub fn new(time_ms: u64, memory_mb: u64) -> Self {
        Self {
            time_limit: Duration::from_millis(time_ms),
            memory_limit_bytes: memory_mb.saturating_mul(1024 * 1024),
        }
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        Self::new(1000, 256)
    }
}

/// Outcome of running a program.
///
/// `verdict` is one of `Ok` (exited 0, output not yet checked), `TimeLimit`,
/// `RuntimeError` or `Unknown` (deadline hit but the kill failed).
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub verdict: Verdict,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RunOutcome {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Runner trait for executing untrusted code
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run `source_code` once with `stdin` as its standard input.
    ///
    /// A non-zero exit is a `RuntimeError` verdict, not an error. `Err` is
    /// reserved for infrastructure faults (cannot create files, cannot spawn).
    async fn run_one_test(
        &self,
        limits: &RunLimits,
        source_code: &str,
        stdin: &[u8],
    ) -> Result<RunOutcome, ExecutionError>;
}
