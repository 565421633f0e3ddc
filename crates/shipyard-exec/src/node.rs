//! Node descriptors

use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Default private key reference
pub const DEFAULT_PRIVATE_KEY: &str = "~/.ssh/id_rsa";

/// Process-wide fallbacks for connection fields a node leaves unset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDefaults {
    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login user
    #[serde(default = "default_username")]
    pub username: String,
    /// Private key path, or `env:VAR` holding a base64 encoded key
    #[serde(default = "default_private_key")]
    pub private_key: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_username() -> String {
    env::var("USER")
        .or_else(|_| env::var("LOGNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

fn default_private_key() -> String {
    DEFAULT_PRIVATE_KEY.to_string()
}

impl Default for NodeDefaults {
    fn default() -> Self {
        Self {
            port: default_port(),
            username: default_username(),
            private_key: default_private_key(),
        }
    }
}

/// Connection parameters for one remote host
///
/// Nodes are immutable once built and are shared as `Arc<Node>` between the
/// registry and every command that targets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Symbolic name
    pub name: String,
    /// Address to connect to (defaults to the name)
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Login user
    pub username: String,
    /// Private key path, or `env:VAR` holding a base64 encoded key
    pub private_key: String,
}

impl Node {
    /// Create a node using the process-wide defaults
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_defaults(name, &NodeDefaults::default())
    }

    /// Create a node from explicit defaults
    pub fn with_defaults(name: impl Into<String>, defaults: &NodeDefaults) -> Self {
        let name = name.into();
        Self {
            host: name.clone(),
            name,
            port: defaults.port,
            username: defaults.username.clone(),
            private_key: defaults.private_key.clone(),
        }
    }

    /// Set the address
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set login user
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set private key reference
    #[must_use]
    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = key.into();
        self
    }

    /// Prefix identifying this node in streamed output
    pub(crate) fn output_prefix(&self) -> String {
        format!("[{}:{}] ", self.name, std::process::id())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}@{}:{})", self.name, self.username, self.host, self.port)
    }
}

/// Prefix used for commands run on the operator's machine
pub(crate) fn local_prefix() -> String {
    format!("[localhost:{}] ", std::process::id())
}
