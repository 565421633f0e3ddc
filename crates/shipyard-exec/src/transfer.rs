//! File transfer over SFTP

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh_sftp::client::SftpSession;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, instrument, warn};

use crate::error::ExecError;
use crate::node::Node;
use crate::session::{DEFAULT_CONNECT_TIMEOUT, SshSession};
use crate::sink::OutputSink;
use crate::traits::FileTransferAgent;

/// SFTP transfer agent bound to an optional target node
///
/// Each operation opens its own session and closes it before returning.
#[derive(Clone)]
pub struct SftpAgent {
    target: Option<Arc<Node>>,
    sink: Arc<dyn OutputSink>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for SftpAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpAgent")
            .field("target", &self.target.as_ref().map(|n| n.name.as_str()))
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl SftpAgent {
    /// Create an agent for `target`; without one every operation fails
    #[must_use]
    pub fn new(target: Option<Arc<Node>>, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            target,
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

    fn node(&self, operation: &'static str) -> Result<&Node, ExecError> {
        self.target.as_deref().ok_or_else(|| {
            error!(operation, "file transfer has no target node");
            ExecError::MissingTarget { operation }
        })
    }

    /// Open a session and start SFTP on it; the session is closed on failure
    async fn open_sftp(&self, node: &Node) -> Result<(SshSession, SftpSession), ExecError> {
        let session = SshSession::open(node, self.connect_timeout).await?;
        match session.sftp().await {
            Ok(sftp) => Ok((session, sftp)),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    async fn close_sftp(node: &Node, session: SshSession, sftp: SftpSession) {
        if let Err(e) = sftp.close().await {
            warn!(node = %node.name, error = %e, "failed to close SFTP session");
        }
        session.close().await;
    }

    fn transfer_error(
        node: &Node,
        direction: &'static str,
        from: &str,
        to: &str,
        reason: String,
    ) -> ExecError {
        ExecError::Transfer {
            node: node.name.clone(),
            direction,
            from: from.to_string(),
            to: to.to_string(),
            reason,
        }
    }

    /// Create the parent directory of `local` if it is missing
    async fn ensure_parent_dir(
        &self,
        node: &Node,
        remote: &str,
        local: &Path,
    ) -> Result<(), ExecError> {
        let Some(dir) = local
            .parent()
            .filter(|d| !d.as_os_str().is_empty() && !d.is_dir())
        else {
            return Ok(());
        };

        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            Self::transfer_error(node, "get", remote, &local.display().to_string(), e.to_string())
        })?;

        if self.sink.is_verbose() {
            self.sink.write_line(&format!(
                "{}Create directory: {}",
                node.output_prefix(),
                dir.display()
            ));
        }
        debug!(dir = %dir.display(), "created local directory");
        Ok(())
    }

    fn report_failure(&self, node: &Node, line: &str, err: &ExecError) {
        self.sink
            .write_line(&format!("{}Couldn't {line}", node.output_prefix()));
        error!(node = %node.name, error = %err, "file transfer failed");
    }
}

#[async_trait]
impl FileTransferAgent for SftpAgent {
    #[instrument(skip(self), fields(node = ?self.target.as_ref().map(|n| &n.name)))]
    async fn download(&self, remote: &str, local: &Path) -> Result<(), ExecError> {
        let node = self.node("get a file")?;
        let local_display = local.display().to_string();

        self.sink.write_line(&format!(
            "{}Get: {remote} -> {local_display}",
            node.output_prefix()
        ));

        let outcome = async {
            self.ensure_parent_dir(node, remote, local).await?;
            let (session, sftp) = self.open_sftp(node).await?;
            let copied = fetch_file(&sftp, remote, local).await;
            Self::close_sftp(node, session, sftp).await;
            copied.map_err(|reason| Self::transfer_error(node, "get", remote, &local_display, reason))
        }
        .await;

        if let Err(e) = &outcome {
            self.report_failure(node, &format!("get: {remote} -> {local_display}"), e);
        }
        outcome
    }

    #[instrument(skip(self), fields(node = ?self.target.as_ref().map(|n| &n.name)))]
    async fn download_to_string(&self, remote: &str) -> Result<String, ExecError> {
        let node = self.node("get a file")?;

        self.sink
            .write_line(&format!("{}Get: {remote}", node.output_prefix()));

        let outcome = async {
            let (session, sftp) = self.open_sftp(node).await?;
            let contents = read_file(&sftp, remote).await;
            Self::close_sftp(node, session, sftp).await;
            contents.map_err(|reason| Self::transfer_error(node, "get", remote, "memory", reason))
        }
        .await;

        if let Err(e) = &outcome {
            self.report_failure(node, &format!("get: {remote}"), e);
        }
        outcome
    }

    #[instrument(skip(self), fields(node = ?self.target.as_ref().map(|n| &n.name)))]
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), ExecError> {
        let node = self.node("put a file")?;
        let local_display = local.display().to_string();

        self.sink.write_line(&format!(
            "{}Put: {local_display} -> {remote}",
            node.output_prefix()
        ));

        let outcome = async {
            if !local.is_file() {
                return Err(ExecError::LocalFileNotFound {
                    path: local.to_path_buf(),
                });
            }
            let (session, sftp) = self.open_sftp(node).await?;
            let sent = send_file(&sftp, local, remote).await;
            Self::close_sftp(node, session, sftp).await;
            sent.map_err(|reason| Self::transfer_error(node, "put", &local_display, remote, reason))
        }
        .await;

        if let Err(e) = &outcome {
            self.report_failure(node, &format!("put: {local_display} -> {remote}"), e);
        }
        outcome
    }

    #[instrument(skip(self, contents), fields(node = ?self.target.as_ref().map(|n| &n.name), bytes = contents.len()))]
    async fn upload_string(&self, remote: &str, contents: &[u8]) -> Result<(), ExecError> {
        let node = self.node("put a file")?;

        self.sink
            .write_line(&format!("{}Put: {remote}", node.output_prefix()));

        let outcome = async {
            let (session, sftp) = self.open_sftp(node).await?;
            let written = write_buffer(&sftp, remote, contents).await;
            Self::close_sftp(node, session, sftp).await;
            written.map_err(|reason| Self::transfer_error(node, "put", "memory", remote, reason))
        }
        .await;

        if let Err(e) = &outcome {
            self.report_failure(node, &format!("put: {remote}"), e);
        }
        outcome
    }
}

async fn fetch_file(sftp: &SftpSession, remote: &str, local: &Path) -> Result<(), String> {
    let mut source = sftp.open(remote).await.map_err(|e| e.to_string())?;
    let mut destination = tokio::fs::File::create(local)
        .await
        .map_err(|e| e.to_string())?;

    let copied = match tokio::io::copy(&mut source, &mut destination).await {
        Ok(_) => destination.flush().await,
        Err(e) => Err(e),
    };
    if let Err(e) = copied {
        drop(destination);
        // never leave a truncated copy behind
        if let Err(remove_err) = tokio::fs::remove_file(local).await {
            warn!(path = %local.display(), error = %remove_err, "failed to remove partial download");
        }
        return Err(e.to_string());
    }
    Ok(())
}

async fn read_file(sftp: &SftpSession, remote: &str) -> Result<String, String> {
    let contents = sftp.read(remote).await.map_err(|e| e.to_string())?;
    String::from_utf8(contents).map_err(|_| "contents are not valid UTF-8".to_string())
}

async fn send_file(sftp: &SftpSession, local: &Path, remote: &str) -> Result<(), String> {
    let mut source = tokio::fs::File::open(local)
        .await
        .map_err(|e| e.to_string())?;
    let mut destination = sftp.create(remote).await.map_err(|e| e.to_string())?;
    tokio::io::copy(&mut source, &mut destination)
        .await
        .map_err(|e| e.to_string())?;
    destination.shutdown().await.map_err(|e| e.to_string())
}

async fn write_buffer(sftp: &SftpSession, remote: &str, contents: &[u8]) -> Result<(), String> {
    let mut destination = sftp.create(remote).await.map_err(|e| e.to_string())?;
    destination
        .write_all(contents)
        .await
        .map_err(|e| e.to_string())?;
    destination.shutdown().await.map_err(|e| e.to_string())
}
