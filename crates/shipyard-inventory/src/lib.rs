//! shipyard-inventory: node and role registry
//!
//! Maps symbolic node and role names to the connection parameters the
//! execution engine needs, and renders the roles report.

pub mod config;
pub mod error;
pub mod registry;
pub mod report;

pub use config::{InventoryConfig, NodeConfig};
pub use error::InventoryError;
pub use registry::{Inventory, Role};
pub use report::{RolesFormat, render_roles};
