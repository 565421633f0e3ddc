//! Local command execution using `tokio::process`

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command as Process};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, instrument, warn};

use crate::command::Command;
use crate::error::ExecError;
use crate::node::local_prefix;
use crate::result::ExecutionResult;
use crate::sink::{OutputCapture, OutputSink};
use crate::traits::CommandExecutor;

const READ_CHUNK: usize = 8192;

/// Local command executor
///
/// Executes commands on the local machine, ignoring any target node.
#[derive(Clone)]
pub struct LocalExecutor {
    sink: Arc<dyn OutputSink>,
}

impl std::fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("verbosity", &self.sink.verbosity())
            .finish_non_exhaustive()
    }
}

impl LocalExecutor {
    /// Create a new local executor writing to `sink`
    #[must_use]
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self { sink }
    }

    /// Internal method to execute command
    #[instrument(skip_all, level = "debug")]
    async fn execute(&self, command: &Command) -> Result<ExecutionResult, ExecError> {
        let commandline = command.commandline().joined();
        let compiled = command.compile();
        let prefix = local_prefix();

        self.sink.write_line(&format!("{prefix}Run: {commandline}"));
        if self.sink.is_very_verbose() {
            self.sink.write_line(&format!("{prefix}Real command: {compiled}"));
        }

        let start = Instant::now();
        debug!(command = %compiled, "executing local command");

        let mut process = Process::new("sh");
        process
            .arg("-c")
            .arg(&compiled)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // own process group, so a timeout reaches the login shell and everything it started
        #[cfg(unix)]
        process.process_group(0);

        let mut child = process
            .spawn()
            .map_err(|e| ExecError::Spawn(e.to_string()))?;

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx));
        }

        let mut capture = OutputCapture::new(self.sink.as_ref());
        let streaming = stream_until_exit(&mut child, &mut rx, &mut capture);

        let outcome = match command.options().timeout {
            Some(limit) => timeout(limit, streaming).await.map_err(|_| limit),
            None => Ok(streaming.await),
        };

        let status = match outcome {
            Ok(status) => status?,
            Err(limit) => {
                error!(
                    command = %compiled,
                    timeout = ?limit,
                    elapsed = ?start.elapsed(),
                    "command timed out"
                );
                terminate(&mut child).await;
                return Err(ExecError::Timeout { timeout: limit });
            }
        };

        let duration = start.elapsed();
        let exit_code = status.code().unwrap_or(-1);

        debug!(
            command = %compiled,
            status = exit_code,
            duration = ?duration,
            "command completed"
        );

        Ok(ExecutionResult {
            exit_code,
            output: capture.into_output(),
            duration,
        })
    }
}

/// Kill the child's process group, then the child itself, and reap it
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                warn!(pid, error = %e, "failed to kill timed out process group");
            }
        }
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill timed out process");
    }
}

/// Forward output until both pipes close, then reap the child
async fn stream_until_exit(
    child: &mut Child,
    rx: &mut mpsc::Receiver<Vec<u8>>,
    capture: &mut OutputCapture<'_>,
) -> Result<ExitStatus, ExecError> {
    while let Some(chunk) = rx.recv().await {
        capture.push(&chunk);
    }
    child
        .wait()
        .await
        .map_err(|e| ExecError::Io(e.to_string()))
}

async fn pump<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to read process output");
                break;
            }
        }
    }
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    #[instrument(skip_all, level = "debug")]
    async fn run(&self, command: &Command) -> Result<ExecutionResult, ExecError> {
        self.execute(command).await
    }

    fn executor_type(&self) -> &'static str {
        "local"
    }
}
