//! shipyard-exec: command execution engine
//!
//! Compiles logical commands into login-shell invocations and runs them on
//! the local machine or on a remote node over SSH, streaming output to an
//! [`OutputSink`]. Files move to and from nodes over SFTP.

pub mod command;
pub mod error;
pub mod keys;
pub mod local;
pub mod node;
pub mod result;
mod session;
pub mod sink;
pub mod ssh;
pub mod traits;
pub mod transfer;

pub use command::{Command, CommandLine, CommandOptions, compile};
pub use error::ExecError;
pub use keys::{KeyError, KeySource};
pub use local::LocalExecutor;
pub use node::{Node, NodeDefaults};
pub use result::ExecutionResult;
pub use session::DEFAULT_CONNECT_TIMEOUT;
pub use sink::{MemorySink, OutputSink, Verbosity};
pub use ssh::SshExecutor;
pub use traits::{CommandExecutor, FileTransferAgent};
pub use transfer::SftpAgent;
