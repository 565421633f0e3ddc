//! In-process SSH server for exercising remote execution and SFTP
//!
//! Exec requests run through `sh -c` on the local machine and stream back
//! over the channel, so compiled commands behave as they would on a node.
//! The SFTP subsystem serves files from a temporary directory.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use russh::keys::{PublicKey, decode_secret_key};
use russh::server::{self, Auth, Msg, Server as _, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_sftp::protocol::{Data, FileAttributes, Handle, OpenFlags, Status, StatusCode, Version};
use shipyard_exec::Node;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::process::Command as Process;

pub const HOST_KEY: &str = include_str!("../fixtures/keys/host");
pub const DEPLOY_KEY: &str = include_str!("../fixtures/keys/deploy");
pub const INTRUDER_KEY: &str = include_str!("../fixtures/keys/intruder");

/// Remote file name whose reads fail after the first chunk
pub const UNREADABLE: &str = "unreadable.bin";

pub struct TestServer {
    port: u16,
    active: Arc<AtomicUsize>,
    keys: TempDir,
    files: TempDir,
}

impl TestServer {
    /// Bind a loopback port and serve until the test ends
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let files = tempfile::tempdir().unwrap();
        let active = Arc::new(AtomicUsize::new(0));

        let authorized = decode_secret_key(DEPLOY_KEY, None)
            .unwrap()
            .public_key()
            .clone();
        let config = Arc::new(server::Config {
            keys: vec![decode_secret_key(HOST_KEY, None).unwrap()],
            auth_rejection_time: Duration::from_millis(10),
            auth_rejection_time_initial: Some(Duration::ZERO),
            ..Default::default()
        });

        let mut acceptor = Acceptor {
            authorized,
            root: files.path().to_path_buf(),
            active: Arc::clone(&active),
        };
        tokio::spawn(async move {
            let _ = acceptor.run_on_socket(config, &listener).await;
        });

        Self {
            port,
            active,
            keys: tempfile::tempdir().unwrap(),
            files,
        }
    }

    /// A node pointing at this server that authenticates with `key`
    pub fn node(&self, name: &str, key: &str) -> Node {
        let path = self.keys.path().join(name);
        std::fs::write(&path, key).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

        Node::new(name)
            .with_host("127.0.0.1")
            .with_port(self.port)
            .with_username("deploy")
            .with_private_key(path.display().to_string())
    }

    /// Local directory backing the remote filesystem root
    pub fn remote_root(&self) -> &Path {
        self.files.path()
    }

    /// Wait until every connection has been torn down
    pub async fn wait_until_idle(&self) -> bool {
        for _ in 0..100 {
            if self.active.load(Ordering::SeqCst) == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

struct Acceptor {
    authorized: PublicKey,
    root: PathBuf,
    active: Arc<AtomicUsize>,
}

impl server::Server for Acceptor {
    type Handler = Connection;

    fn new_client(&mut self, _: Option<SocketAddr>) -> Connection {
        self.active.fetch_add(1, Ordering::SeqCst);
        Connection {
            authorized: self.authorized.clone(),
            root: self.root.clone(),
            active: Arc::clone(&self.active),
            channels: HashMap::new(),
        }
    }
}

struct Connection {
    authorized: PublicKey,
    root: PathBuf,
    active: Arc<AtomicUsize>,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl Connection {
    fn check(&self, key: &PublicKey) -> Auth {
        if key.key_data() == self.authorized.key_data() {
            Auth::Accept
        } else {
            Auth::reject()
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl server::Handler for Connection {
    type Error = russh::Error;

    async fn auth_publickey_offered(
        &mut self,
        _user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(self.check(public_key))
    }

    async fn auth_publickey(
        &mut self,
        _user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(self.check(public_key))
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        session.channel_success(channel)?;
        tokio::spawn(run_command(session.handle(), channel, command));
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match (name, self.channels.remove(&channel_id)) {
            ("sftp", Some(channel)) => {
                session.channel_success(channel_id)?;
                russh_sftp::server::run(channel.into_stream(), FileStore::new(self.root.clone()))
                    .await;
            }
            _ => session.channel_failure(channel_id)?,
        }
        Ok(())
    }
}

/// Run `command` locally, streaming stdout as data and stderr as extended data
async fn run_command(handle: server::Handle, channel: ChannelId, command: String) {
    let spawned = Process::new("sh")
        .arg("-c")
        .arg(&command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let Ok(mut child) = spawned else {
        let _ = handle.exit_status_request(channel, 127).await;
        let _ = handle.close(channel).await;
        return;
    };

    let mut stdout = child.stdout.take().unwrap();
    let mut stderr = child.stderr.take().unwrap();
    let mut out = [0u8; 4096];
    let mut err = [0u8; 4096];
    let (mut out_open, mut err_open) = (true, true);

    while out_open || err_open {
        tokio::select! {
            read = stdout.read(&mut out), if out_open => match read {
                Ok(n) if n > 0 => {
                    // client went away
                    if handle.data(channel, CryptoVec::from_slice(&out[..n])).await.is_err() {
                        return;
                    }
                }
                _ => out_open = false,
            },
            read = stderr.read(&mut err), if err_open => match read {
                Ok(n) if n > 0 => {
                    let chunk = CryptoVec::from_slice(&err[..n]);
                    if handle.extended_data(channel, 1, chunk).await.is_err() {
                        return;
                    }
                }
                _ => err_open = false,
            },
        }
    }

    let status = child
        .wait()
        .await
        .ok()
        .and_then(|status| status.code())
        .unwrap_or(255);
    let _ = handle
        .exit_status_request(channel, u32::try_from(status).unwrap_or(255))
        .await;
    let _ = handle.eof(channel).await;
    let _ = handle.close(channel).await;
}

/// SFTP handler backed by a local directory
struct FileStore {
    root: PathBuf,
    handles: HashMap<String, PathBuf>,
    next_handle: u64,
}

impl FileStore {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            handles: HashMap::new(),
            next_handle: 0,
        }
    }

    fn resolve(&self, remote: &str) -> PathBuf {
        self.root.join(remote.trim_start_matches('/'))
    }

    fn path(&self, handle: &str) -> Result<&Path, StatusCode> {
        self.handles
            .get(handle)
            .map(PathBuf::as_path)
            .ok_or(StatusCode::Failure)
    }
}

fn ok_status(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

impl russh_sftp::server::Handler for FileStore {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        _version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let path = self.resolve(&filename);
        if pflags.contains(OpenFlags::CREATE) {
            std::fs::write(&path, b"").map_err(|_| StatusCode::NoSuchFile)?;
        } else if !path.is_file() {
            return Err(StatusCode::NoSuchFile);
        }

        self.next_handle += 1;
        let handle = self.next_handle.to_string();
        self.handles.insert(handle.clone(), path);
        Ok(Handle { id, handle })
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        let path = self.path(&handle)?;
        if offset > 0 && path.ends_with(UNREADABLE) {
            return Err(StatusCode::Failure);
        }

        let contents = std::fs::read(path).map_err(|_| StatusCode::Failure)?;
        let start = usize::try_from(offset).map_err(|_| StatusCode::Failure)?;
        if start >= contents.len() {
            return Err(StatusCode::Eof);
        }
        let end = contents.len().min(start + len as usize);
        Ok(Data {
            id,
            data: contents[start..end].to_vec(),
        })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        let path = self.path(&handle)?;
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|_| StatusCode::Failure)?;
        file.write_all_at(&data, offset)
            .map_err(|_| StatusCode::Failure)?;
        Ok(ok_status(id))
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        self.handles.remove(&handle);
        Ok(ok_status(id))
    }
}
