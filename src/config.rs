use std::path::Path;
use std::time::Duration;

use serde_derive::Deserialize;

use crate::broadcaster::BroadcastConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    pub fleet: Option<FleetConfig>,
    pub server: Option<ServerConfig>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct FleetConfig {
    pub device_count: Option<usize>,
    pub tick_interval_seconds: Option<u64>,
    pub observer_buffer: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Origins allowed to call the API from a browser. Empty allows any.
    pub allowed_origins: Option<Vec<String>>,
    pub send_timeout_seconds: Option<u64>,
}

impl AppConfig {
    /// Reads the config at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(AppConfig::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::de::from_str(&contents)?)
    }

    pub fn device_count(&self) -> usize {
        self.fleet
            .as_ref()
            .and_then(|f| f.device_count)
            .unwrap_or(10)
    }

    pub fn broadcast(&self) -> BroadcastConfig {
        let defaults = BroadcastConfig::default();
        let fleet = self.fleet.clone().unwrap_or_default();
        BroadcastConfig {
            tick_interval: fleet
                .tick_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.tick_interval),
            observer_buffer: fleet.observer_buffer.unwrap_or(defaults.observer_buffer),
        }
    }

    pub fn host(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.host.clone())
            .unwrap_or("0.0.0.0".to_string())
    }

    pub fn port(&self) -> u16 {
        self.server.as_ref().and_then(|s| s.port).unwrap_or(8000)
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        self.server
            .as_ref()
            .and_then(|s| s.allowed_origins.clone())
            .unwrap_or_default()
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(
            self.server
                .as_ref()
                .and_then(|s| s.send_timeout_seconds)
                .unwrap_or(10),
        )
    }
}
