//! Configuration loading and types

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shipyard_inventory::InventoryConfig;

/// Top-level configuration for the shipyard CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine settings
    #[serde(default)]
    pub settings: Settings,
    /// Node defaults, nodes and roles
    #[serde(flatten)]
    pub inventory: InventoryConfig,
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seconds allowed for TCP connect plus SSH handshake
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Settings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("failed to read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from default paths or use defaults
    pub fn load_default() -> eyre::Result<Self> {
        // Check environment variable
        if let Ok(path) = std::env::var("SHIPYARD_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let mut paths = vec![
            PathBuf::from("shipyard.toml"),
            PathBuf::from("/etc/shipyard/shipyard.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("shipyard/shipyard.toml"));
        }

        for path in paths {
            if path.exists() {
                return Self::load(&path);
            }
        }

        // Return default config if no file found
        tracing::debug!("no config file found, using defaults");
        Ok(Config::default())
    }
}
