//! Roles report rendering

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::InventoryError;
use crate::registry::Inventory;

/// Output format for the roles report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RolesFormat {
    /// Table with a header row
    #[default]
    Txt,
    /// Table rows only
    TxtNoHeader,
    /// `{"role": {"nodes": [...]}}`
    Json,
}

impl FromStr for RolesFormat {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "txt" => Ok(RolesFormat::Txt),
            "txt-no-header" => Ok(RolesFormat::TxtNoHeader),
            "json" => Ok(RolesFormat::Json),
            other => Err(InventoryError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for RolesFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RolesFormat::Txt => "txt",
            RolesFormat::TxtNoHeader => "txt-no-header",
            RolesFormat::Json => "json",
        })
    }
}

#[derive(Serialize)]
struct RoleEntry<'a> {
    nodes: Vec<&'a str>,
}

/// Render every role and its member nodes
///
/// # Errors
/// Returns `InventoryError::ParseError` if JSON serialization fails
pub fn render_roles(inventory: &Inventory, format: RolesFormat) -> Result<String, InventoryError> {
    let roles = inventory.roles();

    match format {
        RolesFormat::Json => {
            let data: BTreeMap<&str, RoleEntry<'_>> = roles
                .iter()
                .map(|(name, role)| {
                    (
                        name.as_str(),
                        RoleEntry {
                            nodes: role.node_names().collect(),
                        },
                    )
                })
                .collect();
            serde_json::to_string(&data).map_err(|e| InventoryError::ParseError(e.to_string()))
        }
        RolesFormat::Txt | RolesFormat::TxtNoHeader => {
            if roles.is_empty() {
                return Ok("There are not any roles.\n".to_string());
            }

            let mut rows: Vec<(String, String)> = roles
                .iter()
                .map(|(name, role)| (name.clone(), role.node_names().collect::<Vec<_>>().join(",")))
                .collect();
            if format == RolesFormat::Txt {
                rows.insert(0, ("name".to_string(), "nodes".to_string()));
            }

            let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
            let mut out = String::new();
            for (name, nodes) in rows {
                out.push_str(&format!("{name:<width$}    {nodes}\n"));
            }
            Ok(out)
        }
    }
}
