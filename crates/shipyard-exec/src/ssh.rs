//! Remote command execution over SSH using the russh crate

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, error, instrument};

use crate::command::Command;
use crate::error::ExecError;
use crate::result::ExecutionResult;
use crate::session::{DEFAULT_CONNECT_TIMEOUT, SshSession};
use crate::sink::{OutputCapture, OutputSink};
use crate::traits::CommandExecutor;

/// SSH command executor
///
/// Runs each command on the command's target node over a session that is
/// opened for that command alone and closed before `run` returns.
#[derive(Clone)]
pub struct SshExecutor {
    sink: Arc<dyn OutputSink>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor")
            .field("connect_timeout", &self.connect_timeout)
            .field("verbosity", &self.sink.verbosity())
            .finish_non_exhaustive()
    }
}

impl SshExecutor {
    /// Create a new SSH executor writing to `sink`
    #[must_use]
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            sink,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the limit for connecting and completing the SSH handshake
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Execute command on its target node
    #[instrument(skip_all, fields(node = tracing::field::Empty))]
    async fn execute_remote(&self, command: &Command) -> Result<ExecutionResult, ExecError> {
        let Some(node) = command.target() else {
            error!("remote command has no target node");
            return Err(ExecError::MissingTarget {
                operation: "run the command",
            });
        };
        tracing::Span::current().record("node", node.name.as_str());

        let commandline = command.commandline().joined();
        let compiled = command.compile();
        let prefix = node.output_prefix();

        self.sink.write_line(&format!("{prefix}Run: {commandline}"));
        if self.sink.is_very_verbose() {
            self.sink.write_line(&format!("{prefix}Real command: {compiled}"));
        }

        let start = Instant::now();
        let session = SshSession::open(node, self.connect_timeout)
            .await
            .inspect_err(|e| error!(error = %e, "failed to open SSH session"))?;

        debug!(command = %compiled, "executing remote command");

        let mut capture = OutputCapture::new(self.sink.as_ref());
        let executing = session.exec(&compiled, &mut capture);
        let outcome = match command.options().timeout {
            Some(limit) => timeout(limit, executing).await.map_err(|_| limit),
            None => Ok(executing.await),
        };

        // closing the session also tears down a channel left running by a timeout
        session.close().await;

        let exit_code = match outcome {
            Ok(status) => status?,
            Err(limit) => {
                error!(
                    command = %compiled,
                    timeout = ?limit,
                    elapsed = ?start.elapsed(),
                    "command timed out"
                );
                return Err(ExecError::Timeout { timeout: limit });
            }
        };

        let duration = start.elapsed();
        debug!(
            command = %compiled,
            status = exit_code,
            duration = ?duration,
            "remote command completed"
        );

        Ok(ExecutionResult {
            exit_code,
            output: capture.into_output(),
            duration,
        })
    }
}

#[async_trait]
impl CommandExecutor for SshExecutor {
    async fn run(&self, command: &Command) -> Result<ExecutionResult, ExecError> {
        self.execute_remote(command).await
    }

    fn executor_type(&self) -> &'static str {
        "ssh"
    }
}
