//! Error types for shipyard-exec

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during command execution and file transfer
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// A remote operation was requested without a target node
    #[error("node is not defined to {operation}")]
    MissingTarget {
        /// Operation that needed a node (`run the command`, `get a file`, ...)
        operation: &'static str,
    },

    /// Transport connected but the credential exchange failed
    #[error("unable to login {node}: {reason}")]
    Authentication {
        /// Name of the node
        node: String,
        /// Reason reported by the key loader or the server
        reason: String,
    },

    /// Connection could not be established or dropped mid-stream
    #[error("connection to {node} failed: {reason}")]
    Transport {
        /// Name of the node
        node: String,
        /// Underlying transport error
        reason: String,
    },

    /// Command did not complete within its configured timeout
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Upload source does not exist as a regular file
    #[error("couldn't put: local file not found: {}", path.display())]
    LocalFileNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// File transfer failed after the session was established
    #[error("couldn't {direction} {from} -> {to} on {node}: {reason}")]
    Transfer {
        /// Name of the node
        node: String,
        /// `get` or `put`
        direction: &'static str,
        /// Source of the transfer
        from: String,
        /// Destination of the transfer
        to: String,
        /// Underlying failure
        reason: String,
    },

    /// Local process could not be spawned
    #[error("failed to spawn process: {0}")]
    Spawn(String),

    /// I/O error during local execution
    #[error("I/O error: {0}")]
    Io(String),
}

impl ExecError {
    /// Whether a caller may reasonably retry the operation
    ///
    /// The engine itself never retries.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecError::Transport { .. } | ExecError::Timeout { .. })
    }

    pub(crate) fn transport(node: &str, reason: impl ToString) -> Self {
        ExecError::Transport {
            node: node.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn authentication(node: &str, reason: impl ToString) -> Self {
        ExecError::Authentication {
            node: node.to_string(),
            reason: reason.to_string(),
        }
    }
}
