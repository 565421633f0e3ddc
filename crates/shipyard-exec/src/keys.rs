//! SSH private key resolution

use std::env;
use std::path::{Path, PathBuf};

use russh::keys::{PrivateKey, decode_secret_key, load_secret_key};
use tracing::{debug, warn};

/// Where a node's private key comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Explicit path to key file (`~` expands to the home directory)
    Path(PathBuf),
    /// Base64-encoded key held in an environment variable
    Env(String),
}

impl KeySource {
    /// Parse a node's key reference: `env:VAR` or a file path
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        match reference.strip_prefix("env:") {
            Some(var_name) => KeySource::Env(var_name.to_string()),
            None => KeySource::Path(expand_home(reference)),
        }
    }

    /// Load the key material
    ///
    /// # Errors
    /// Returns `KeyError` if the file or variable is missing, has unsafe
    /// permissions, or does not hold a readable private key
    pub fn load(&self) -> Result<PrivateKey, KeyError> {
        match self {
            KeySource::Path(path) => {
                if !path.is_file() {
                    return Err(KeyError::NotFound(path.display().to_string()));
                }
                validate_key_permissions(path)?;
                debug!(path = %path.display(), "loading private key");
                load_secret_key(path, None).map_err(|e| KeyError::Invalid(e.to_string()))
            }
            KeySource::Env(var_name) => {
                let base64_key =
                    env::var(var_name).map_err(|_| KeyError::EnvNotSet(var_name.clone()))?;
                let key_data = base64_decode(&base64_key).map_err(|_| KeyError::InvalidBase64)?;
                let pem = String::from_utf8(key_data).map_err(|_| KeyError::InvalidBase64)?;
                debug!(var = %var_name, "decoding private key from environment");
                decode_secret_key(&pem, None).map_err(|e| KeyError::Invalid(e.to_string()))
            }
        }
    }
}

/// Key resolution errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("environment variable {0} not set")]
    EnvNotSet(String),

    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("key file permissions too open: {0} (should be 600)")]
    BadPermissions(String),

    #[error("key file not found: {0}")]
    NotFound(String),

    #[error("unreadable private key: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn expand_home(reference: &str) -> PathBuf {
    if let Some(rest) = reference.strip_prefix("~/") {
        if let Some(home) = env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
        warn!(key = %reference, "HOME is not set, using key path as-is");
    }
    PathBuf::from(reference)
}

fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input.trim())
}

#[cfg(unix)]
fn validate_key_permissions(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode();

    // group and other must have no access
    if mode & 0o77 != 0 {
        return Err(KeyError::BadPermissions(path.display().to_string()));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_key_permissions(_path: &Path) -> Result<(), KeyError> {
    Ok(())
}
