//! Bridge configuration file
//!
//! ```toml
//! log_level = "debug"
//!
//! [mqtt]
//! enabled = true
//! host = "broker.local"
//! topic = "vzlogger"
//! ```
//!
//! The `[mqtt]` table is kept raw and handed to
//! [`ClientConfig::from_options`](crate::mqtt::ClientConfig::from_options), which
//! does its own key-by-key validation.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, Level};

const CONFIG_DIR: &str = "meter-mqtt-bridge";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Clone, Debug, Default)]
pub struct BridgeConfig {
    pub log_level: Option<String>,
    pub mqtt: Option<toml::Table>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl BridgeConfig {
    pub async fn load(path: &Path) -> Result<Self, ConfigFileError> {
        debug!("Loading bridge config from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigFileError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        toml::from_str(&content).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Log level from the file, `info` when absent or unknown
    pub fn log_level(&self) -> Level {
        self.log_level
            .as_deref()
            .and_then(|level| level.parse().ok())
            .unwrap_or(Level::INFO)
    }
}

/// `<config dir>/meter-mqtt-bridge/config.toml`, falling back to the working directory
pub fn default_config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}
