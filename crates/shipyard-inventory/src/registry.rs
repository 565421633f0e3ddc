//! Node and role registry

use std::collections::BTreeMap;
use std::sync::Arc;

use shipyard_exec::{Node, NodeDefaults};
use tracing::{debug, instrument};

use crate::config::{InventoryConfig, NodeConfig};
use crate::error::InventoryError;

/// A named group of nodes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Role {
    /// Member nodes by name
    pub nodes: BTreeMap<String, Arc<Node>>,
}

impl Role {
    /// Member names in order
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }
}

/// Resolved nodes and roles
///
/// Nodes are built once and handed out as shared, read-only `Arc<Node>`s.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    nodes: BTreeMap<String, Arc<Node>>,
    roles: BTreeMap<String, Role>,
}

impl Inventory {
    /// Build the registry from its configuration
    ///
    /// Role members that are not declared as nodes become nodes whose host is
    /// their name.
    ///
    /// # Errors
    /// Returns `InventoryError::EmptyName` for blank node or role names
    #[instrument(skip_all, level = "debug")]
    pub fn from_config(config: &InventoryConfig) -> Result<Self, InventoryError> {
        let mut nodes = BTreeMap::new();
        for (name, node_config) in &config.nodes {
            if name.trim().is_empty() {
                return Err(InventoryError::EmptyName("nodes"));
            }
            nodes.insert(
                name.clone(),
                Arc::new(build_node(name, node_config, &config.defaults)),
            );
        }

        let mut roles = BTreeMap::new();
        for (role_name, members) in &config.roles {
            if role_name.trim().is_empty() {
                return Err(InventoryError::EmptyName("roles"));
            }
            let mut role = Role::default();
            for member in members {
                if member.trim().is_empty() {
                    return Err(InventoryError::EmptyName("roles"));
                }
                let node = nodes
                    .entry(member.clone())
                    .or_insert_with(|| {
                        debug!(node = %member, role = %role_name, "declaring implicit node");
                        Arc::new(Node::with_defaults(member.clone(), &config.defaults))
                    })
                    .clone();
                role.nodes.insert(member.clone(), node);
            }
            roles.insert(role_name.clone(), role);
        }

        debug!(nodes = nodes.len(), roles = roles.len(), "inventory loaded");
        Ok(Self { nodes, roles })
    }

    /// Parse TOML text and build the registry
    ///
    /// # Errors
    /// Returns `InventoryError::ParseError` for malformed TOML
    pub fn from_toml(content: &str) -> Result<Self, InventoryError> {
        let config = InventoryConfig::from_toml(content)
            .map_err(|e| InventoryError::ParseError(e.to_string()))?;
        Self::from_config(&config)
    }

    /// Look up a node by name
    ///
    /// # Errors
    /// Returns `InventoryError::NodeNotFound` for unknown names
    pub fn node(&self, name: &str) -> Result<Arc<Node>, InventoryError> {
        self.nodes
            .get(name)
            .cloned()
            .ok_or_else(|| InventoryError::NodeNotFound(name.to_string()))
    }

    /// Look up a role by name
    ///
    /// # Errors
    /// Returns `InventoryError::RoleNotFound` for unknown names
    pub fn role(&self, name: &str) -> Result<&Role, InventoryError> {
        self.roles
            .get(name)
            .ok_or_else(|| InventoryError::RoleNotFound(name.to_string()))
    }

    /// Resolve a node name, or else a role name to its members
    ///
    /// # Errors
    /// Returns `InventoryError::UnknownTarget` if neither exists
    pub fn resolve(&self, target: &str) -> Result<Vec<Arc<Node>>, InventoryError> {
        if let Some(node) = self.nodes.get(target) {
            return Ok(vec![Arc::clone(node)]);
        }
        self.roles
            .get(target)
            .map(|role| role.nodes.values().cloned().collect())
            .ok_or_else(|| InventoryError::UnknownTarget(target.to_string()))
    }

    /// All roles by name
    pub fn roles(&self) -> &BTreeMap<String, Role> {
        &self.roles
    }

    /// All nodes by name
    pub fn nodes(&self) -> &BTreeMap<String, Arc<Node>> {
        &self.nodes
    }
}

fn build_node(name: &str, config: &NodeConfig, defaults: &NodeDefaults) -> Node {
    let mut node = Node::with_defaults(name, defaults);
    if let Some(host) = &config.host {
        node = node.with_host(host);
    }
    if let Some(port) = config.port {
        node = node.with_port(port);
    }
    if let Some(username) = &config.username {
        node = node.with_username(username);
    }
    if let Some(key) = &config.private_key {
        node = node.with_private_key(key);
    }
    node
}
