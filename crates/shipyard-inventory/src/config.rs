//! Inventory configuration types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shipyard_exec::NodeDefaults;

/// Node and role declarations as written in `shipyard.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Fallbacks for fields a node leaves unset
    #[serde(default)]
    pub defaults: NodeDefaults,
    /// Nodes by name
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeConfig>,
    /// Role name to member node names
    #[serde(default)]
    pub roles: BTreeMap<String, Vec<String>>,
}

/// Connection settings for a single node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address to connect to (defaults to the node name)
    pub host: Option<String>,
    /// SSH port
    pub port: Option<u16>,
    /// Login user
    pub username: Option<String>,
    /// Private key path, or `env:VAR`
    pub private_key: Option<String>,
}

impl InventoryConfig {
    /// Parse from TOML text
    ///
    /// # Errors
    /// Returns the TOML error if the text is malformed
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
