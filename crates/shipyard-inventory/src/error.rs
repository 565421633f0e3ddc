//! Error types for shipyard-inventory

use thiserror::Error;

/// Errors that can occur while building or querying the inventory
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// No node with this name
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// No role with this name
    #[error("role not found: {0}")]
    RoleNotFound(String),

    /// Name is neither a node nor a role
    #[error("no node or role named {0}")]
    UnknownTarget(String),

    /// A node or role was declared with an empty name
    #[error("empty name in {0}")]
    EmptyName(&'static str),

    /// Inventory file could not be parsed
    #[error("invalid inventory: {0}")]
    ParseError(String),

    /// Unsupported report format
    #[error("unsupported format \"{0}\"")]
    UnsupportedFormat(String),
}
