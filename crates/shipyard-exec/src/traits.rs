//! Executor and file transfer traits

use std::path::Path;

use async_trait::async_trait;

use crate::command::Command;
use crate::error::ExecError;
use crate::result::ExecutionResult;

/// Runs a compiled [`Command`] somewhere
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the command, streaming its output to the executor's sink
    ///
    /// # Errors
    /// Returns `ExecError` when the command could not be started or did not
    /// finish. A nonzero exit code is not an error.
    async fn run(&self, command: &Command) -> Result<ExecutionResult, ExecError>;

    /// Short name for logs
    fn executor_type(&self) -> &'static str;
}

/// Moves files to and from a remote node
#[async_trait]
pub trait FileTransferAgent: Send + Sync {
    /// Fetch a remote file into `local`, creating its parent directory
    async fn download(&self, remote: &str, local: &Path) -> Result<(), ExecError>;

    /// Fetch a remote file's contents
    async fn download_to_string(&self, remote: &str) -> Result<String, ExecError>;

    /// Send a local regular file to `remote`
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), ExecError>;

    /// Write an in-memory buffer to `remote`
    async fn upload_string(&self, remote: &str, contents: &[u8]) -> Result<(), ExecError>;
}
