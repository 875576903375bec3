//! Configuration file loading.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kenshi_bridge::BridgeConfig;
use tracing::{debug, info};

/// `<config dir>/kenshi-bridge/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("kenshi-bridge").join("config.toml"))
}

/// Load the configuration.
///
/// An explicitly given file must exist; a missing default file yields the
/// built-in defaults.
pub fn load(explicit: Option<&Path>) -> Result<BridgeConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                debug!("No configuration file, using defaults");
                return Ok(BridgeConfig::default());
            }
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config = parse(&content).with_context(|| format!("Invalid config {}", path.display()))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

pub fn parse(content: &str) -> Result<BridgeConfig> {
    Ok(toml::from_str(content)?)
}
