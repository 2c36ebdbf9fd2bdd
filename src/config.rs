//! Agent configuration.
//!
//! Loaded from a TOML file at the OS config dir (overridable via the
//! `MQTT_SYSMON_CONFIG` env var or `--config`); a missing file falls back
//! to defaults so the agent runs unconfigured against a local broker.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_broker_host")]
    pub broker_host: String,
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Defaults to `mqtt-sysmon-{device_id}` when unset.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name; "auto" resolves from the hostname.
    #[serde(default = "default_auto")]
    pub name: String,
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Fast cadence window in seconds; also the combined sample duration.
    #[serde(default = "default_fast_interval")]
    pub fast_interval_secs: u64,
    /// Slow cadence (SMART health) period in seconds.
    #[serde(default = "default_slow_interval")]
    pub slow_interval_secs: u64,
    /// Interfaces to publish throughput for; empty means every
    /// non-loopback interface present at startup.
    #[serde(default)]
    pub interfaces: Vec<String>,
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_keep_alive() -> u16 {
    60
}

fn default_auto() -> String {
    "auto".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_fast_interval() -> u64 {
    10
}

fn default_slow_interval() -> u64 {
    3600
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: default_broker_host(),
            broker_port: default_broker_port(),
            username: None,
            password: None,
            client_id: None,
            keep_alive_secs: default_keep_alive(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_auto(),
            discovery_prefix: default_discovery_prefix(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            fast_interval_secs: default_fast_interval(),
            slow_interval_secs: default_slow_interval(),
            interfaces: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// Load config, preferring an explicit path over the default location.
    pub async fn load(path_override: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path_override {
            Some(p) => p.to_path_buf(),
            None => Self::config_file_path(),
        };

        if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            Ok(toml::from_str(&content)?)
        } else {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// OS-specific default config path, env-overridable.
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var("MQTT_SYSMON_CONFIG") {
            return PathBuf::from(path);
        }

        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("mqtt-sysmon");
        path.push("config.toml");
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = MonitorConfig::default();
        assert_eq!(config.mqtt.broker_host, "localhost");
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.device.discovery_prefix, "homeassistant");
        assert_eq!(config.sampling.fast_interval_secs, 10);
        assert_eq!(config.sampling.slow_interval_secs, 3600);
        assert!(config.sampling.interfaces.is_empty());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: MonitorConfig = toml::from_str(
            r#"
            [mqtt]
            broker_host = "broker.lan"
            username = "mon"
            password = "secret"

            [sampling]
            fast_interval_secs = 5
            interfaces = ["eth0"]
            "#,
        )
        .unwrap();

        assert_eq!(config.mqtt.broker_host, "broker.lan");
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.mqtt.username.as_deref(), Some("mon"));
        assert_eq!(config.sampling.fast_interval_secs, 5);
        assert_eq!(config.sampling.slow_interval_secs, 3600);
        assert_eq!(config.sampling.interfaces, vec!["eth0".to_string()]);
    }

    #[tokio::test]
    async fn load_reads_explicit_path_and_defaults_on_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[device]\nname = \"nas\"\n")
            .await
            .unwrap();

        let config = MonitorConfig::load(Some(&path)).await.unwrap();
        assert_eq!(config.device.name, "nas");

        let missing = dir.path().join("absent.toml");
        let config = MonitorConfig::load(Some(&missing)).await.unwrap();
        assert_eq!(config.device.name, "auto");
    }
}
