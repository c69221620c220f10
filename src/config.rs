//! Application configuration
//!
//! One TOML file, every field optional. A missing file is not an error: the
//! remote falls back to defaults so it stays usable without any setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::mqtt::config::{BrokerUrl, BrokerUrlError, ConnectionOptions};
use crate::mqtt::error::EncodingError;
use crate::mqtt::topics::DeviceTopics;

const CONFIG_DIR: &str = ".config/switch-remote";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    InvalidBrokerUrl(#[from] BrokerUrlError),

    #[error("Invalid timer slot: {0}")]
    InvalidTimerSlot(#[from] EncodingError),

    #[error("Invalid device topic {0:?}: must be non-empty without '+', '#' or NUL")]
    InvalidDeviceTopic(String),

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SwitchConfig {
    pub broker_url: String,
    /// Device address segment of the command topics
    pub device_topic: String,
    pub client_id_prefix: String,
    pub reconnect_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub keep_alive_secs: u64,
    /// Device timer used for schedules (1-16)
    pub timer_slot: u8,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            broker_url: "wss://broker.emqx.io:8084/mqtt".to_string(),
            device_topic: "messi".to_string(),
            client_id_prefix: "rn_led_".to_string(),
            reconnect_interval_ms: 1000,
            connect_timeout_ms: 5000,
            keep_alive_secs: 30,
            timer_slot: 1,
        }
    }
}

impl SwitchConfig {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| {
            warn!("Could not determine home directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SwitchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Loaded config from {}", path.display());
        Self::from_toml(&content)
    }

    /// Loads `path`, or returns the defaults when the file does not exist.
    pub async fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if !exists {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await.map_err(io_error)?;

        info!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker_url()?;
        self.topics()?;
        for (field, value) in [
            ("reconnect_interval_ms", self.reconnect_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        Ok(())
    }

    pub fn broker_url(&self) -> Result<BrokerUrl, ConfigError> {
        Ok(BrokerUrl::parse(&self.broker_url)?)
    }

    /// Command topics for the configured device. The device segment is
    /// published to verbatim, so wildcard characters are refused.
    pub fn topics(&self) -> Result<DeviceTopics, ConfigError> {
        let device = &self.device_topic;
        if device.is_empty() || device.contains(['+', '#', '\0']) {
            return Err(ConfigError::InvalidDeviceTopic(device.clone()));
        }
        Ok(DeviceTopics::new(&self.device_topic, self.timer_slot)?)
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            client_id_prefix: self.client_id_prefix.clone(),
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            ..ConnectionOptions::default()
        }
    }
}
