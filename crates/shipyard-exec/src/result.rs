//! Result type for command execution

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome of one command run
///
/// The engine does not interpret the exit code; deciding what counts as a
/// failure is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit status code (0 for success, -1 if none was reported)
    pub exit_code: i32,
    /// Combined stdout and stderr, in arrival order
    pub output: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl ExecutionResult {
    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
