//! Per-operation SSH session lifecycle
//!
//! Every remote operation opens its own session and closes it before
//! returning, on success and failure alike.

use std::sync::Arc;
use std::time::Duration;

use russh::keys::{PrivateKeyWithHashAlg, ssh_key};
use russh::{ChannelMsg, Disconnect, client};
use russh_sftp::client::SftpSession;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::ExecError;
use crate::keys::KeySource;
use crate::node::Node;
use crate::sink::OutputCapture;

/// Default limit for TCP connect plus SSH handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// SSH client handler for russh
#[derive(Debug)]
struct ClientHandler {
    node: String,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host keys are not pinned; record what the server presented
        debug!(
            node = %self.node,
            fingerprint = %server_public_key.fingerprint(ssh_key::HashAlg::Sha256),
            "accepting server host key"
        );
        Ok(true)
    }
}

/// An authenticated connection to one node
pub(crate) struct SshSession {
    node: String,
    handle: client::Handle<ClientHandler>,
}

impl SshSession {
    /// Connect to `node` and authenticate with its private key
    ///
    /// A connection that fails to authenticate is disconnected before the
    /// error is returned.
    #[instrument(skip_all, fields(node = %node.name))]
    pub(crate) async fn open(node: &Node, connect_timeout: Duration) -> Result<Self, ExecError> {
        info!(
            host = %node.host,
            port = node.port,
            user = %node.username,
            "connecting to SSH"
        );

        let config = Arc::new(client::Config::default());
        let handler = ClientHandler {
            node: node.name.clone(),
        };

        let connecting = client::connect(config, (node.host.as_str(), node.port), handler);
        let handle = match timeout(connect_timeout, connecting).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(ExecError::transport(&node.name, e)),
            Err(_) => {
                return Err(ExecError::transport(
                    &node.name,
                    format!("connect timed out after {connect_timeout:?}"),
                ));
            }
        };

        let mut session = Self {
            node: node.name.clone(),
            handle,
        };

        if let Err(e) = session.authenticate(node).await {
            session.close().await;
            return Err(e);
        }

        info!(host = %node.host, "SSH connected and authenticated");
        Ok(session)
    }

    async fn authenticate(&mut self, node: &Node) -> Result<(), ExecError> {
        let key = KeySource::parse(&node.private_key)
            .load()
            .map_err(|e| ExecError::authentication(&node.name, e))?;

        let hash_alg = self
            .handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        let auth_res = self
            .handle
            .authenticate_publickey(
                &node.username,
                PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
            )
            .await
            .map_err(|e| ExecError::authentication(&node.name, e))?;

        if !auth_res.success() {
            return Err(ExecError::authentication(
                &node.name,
                "public key authentication failed",
            ));
        }
        Ok(())
    }

    /// Execute `compiled` on a fresh channel, teeing output into `capture`
    ///
    /// Returns the remote exit status, or -1 if the server never sent one.
    pub(crate) async fn exec(
        &self,
        compiled: &str,
        capture: &mut OutputCapture<'_>,
    ) -> Result<i32, ExecError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::transport(&self.node, e))?;

        channel
            .exec(true, compiled)
            .await
            .map_err(|e| ExecError::transport(&self.node, e))?;

        let mut status = -1;
        let mut finished = false;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => capture.push(&data),
                // stderr is merged into the same stream
                Some(ChannelMsg::ExtendedData { data, .. }) => capture.push(&data),
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    status = exit_status.cast_signed();
                    finished = true;
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    debug!(node = %self.node, signal = ?signal_name, "remote command killed by signal");
                    finished = true;
                }
                Some(ChannelMsg::Eof) => finished = true,
                Some(ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        if !finished {
            return Err(ExecError::transport(
                &self.node,
                "channel closed before the command finished",
            ));
        }

        Ok(status)
    }

    /// Start the SFTP subsystem on a fresh channel
    pub(crate) async fn sftp(&self) -> Result<SftpSession, ExecError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::transport(&self.node, e))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| ExecError::transport(&self.node, e))?;

        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ExecError::transport(&self.node, e))
    }

    /// Disconnect; failures are logged, never returned
    pub(crate) async fn close(self) {
        match self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            Ok(()) => info!(node = %self.node, "SSH disconnected"),
            Err(e) => warn!(node = %self.node, error = %e, "failed to disconnect cleanly"),
        }
    }
}
