//! Configuration file handling for etcd-pilot
//!
//! Cluster configuration is TOML; persisted container state is JSON.

pub mod duration;

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("etcd-pilot")
}

/// Get the default cluster configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("cluster.toml")
}

/// Get the default container state file path
pub fn default_state_path() -> PathBuf {
    default_config_dir().join("state.json")
}

/// Load configuration from a TOML file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Load persisted state from a JSON file, `None` when it does not exist yet
pub fn load_state<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, ConfigError> {
    if !path.exists() {
        tracing::debug!("No state file at {:?}", path);
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read state: {}", e)))?;

    Ok(Some(serde_json::from_str(&content)?))
}

/// Save state to a JSON file, creating its directory
pub fn save_state<T: serde::Serialize>(path: &Path, state: &T) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(state)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create state dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write {:?}: {}", path, e)))?;

    Ok(())
}
