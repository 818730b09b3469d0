//! Agent configuration stored as TOML.
//!
//! A missing config file at the default location is replaced by a generated default so the
//! agent can start on a fresh device. An explicit path that does not exist is an error.

use crate::mqtt::config::MqttConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Level};

const CONFIG_DIR: &str = "iotsensor";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub device: DeviceSettings,
    pub network: NetworkSettings,
    pub mqtt: MqttConfig,
    pub led: LedSettings,
    pub sampling: SamplingSettings,
    pub telemetry: TelemetrySettings,
    pub logging: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Reported as `device_id` in telemetry; falls back to the MQTT client id when empty
    pub id: String,
    /// Consecutive failures of one kind before recovery kicks in
    pub max_error_count: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            id: String::new(),
            max_error_count: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub interface: String,
    /// Informational only, association is left to the OS
    pub ssid: String,
    pub status_check_interval_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            ssid: String::new(),
            status_check_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedDriverKind {
    /// Keep frames in memory and log them
    Log,
    /// WS2812 strip on the SPI bus
    Spi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedSettings {
    pub driver: LedDriverKind,
    pub spi_bus: u8,
    pub spi_slave_select: u8,
    pub num_leds: usize,
    pub default_color: (u8, u8, u8),
    pub default_brightness: f32,
}

impl Default for LedSettings {
    fn default() -> Self {
        Self {
            driver: LedDriverKind::Log,
            spi_bus: 0,
            spi_slave_select: 0,
            num_leds: 1,
            default_color: (0, 0, 0),
            default_brightness: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    pub thermal_zone_path: PathBuf,
    pub interval_ms: u64,
    pub calibration_offset: f64,
    pub filter_enabled: bool,
    pub filter_samples: usize,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            thermal_zone_path: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
            interval_ms: 15_000,
            calibration_offset: 0.0,
            filter_enabled: true,
            filter_samples: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub include_battery: bool,
    pub battery_voltage_path: PathBuf,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            include_battery: false,
            battery_voltage_path: PathBuf::from("/sys/class/power_supply/BAT0/voltage_now"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// DEBUG, INFO, WARNING or ERROR
    pub level: String,
    /// When false, DEBUG output is suppressed regardless of `level`
    pub debug: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            debug: true,
        }
    }
}

impl LogSettings {
    pub fn level_filter(&self) -> Level {
        let level = parse_level(&self.level).unwrap_or_else(|| {
            warn!("Unknown log level {}, using INFO", self.level);
            Level::INFO
        });
        if !self.debug && level > Level::INFO {
            Level::INFO
        } else {
            level
        }
    }
}

pub fn parse_level(name: &str) -> Option<Level> {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Some(Level::TRACE),
        "DEBUG" => Some(Level::DEBUG),
        "INFO" => Some(Level::INFO),
        "WARN" | "WARNING" => Some(Level::WARN),
        "ERROR" => Some(Level::ERROR),
        _ => None,
    }
}

impl AgentConfig {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads the config from `path`, or from the default location when `None`.
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                if !tokio::fs::try_exists(path).await.map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })? {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                Self::read_from(path).await
            }
            None => {
                let path = Self::default_path();
                Self::ensure_default_config(&path).await?;
                Self::read_from(&path).await
            }
        }
    }

    async fn read_from(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading config from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&content)
    }

    pub async fn ensure_default_config(path: &Path) -> Result<(), ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if !exists {
            info!("Creating default configuration at {}", path.display());
            Self::default().save(path).await?;
        }
        Ok(())
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let content = self.to_toml_string()?;
        tokio::fs::write(path, content)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn device_id(&self) -> &str {
        if self.device.id.is_empty() {
            &self.mqtt.client_id
        } else {
            &self.device.id
        }
    }

    /// Collects every problem instead of stopping at the first one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.network.interface.trim().is_empty() {
            errors.push("network interface is not configured".to_string());
        }

        if self.mqtt.broker.trim().is_empty() {
            errors.push("MQTT broker address is not configured".to_string());
        }
        if self.mqtt.client_id.trim().is_empty() {
            errors.push("MQTT client id is not configured".to_string());
        }
        if self.mqtt.port == 0 {
            errors.push("invalid MQTT port 0".to_string());
        }
        if self.mqtt.qos > 2 {
            errors.push(format!("MQTT QoS must be 0-2, got {}", self.mqtt.qos));
        }
        if self.mqtt.temperature_topic.trim().is_empty() {
            errors.push("temperature topic is empty".to_string());
        }
        if self.mqtt.control_topic.trim().is_empty() {
            errors.push("control topic is empty".to_string());
        }

        if self.led.num_leds < 1 {
            errors.push("LED count must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.led.default_brightness) {
            errors.push(format!(
                "default LED brightness must be within 0.0-1.0, got {}",
                self.led.default_brightness
            ));
        }

        if self.sampling.interval_ms < 100 {
            errors.push(format!(
                "sampling interval must be at least 100ms, got {}ms",
                self.sampling.interval_ms
            ));
        }
        if self.sampling.filter_samples < 1 {
            errors.push("filter sample count must be at least 1".to_string());
        }

        if self.device.max_error_count < 1 {
            errors.push("max error count must be at least 1".to_string());
        }

        if errors.is_empty() {
            debug!("Configuration validated");
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mqtt.temperature_topic, "esp32/s3/temperature");
        assert_eq!(config.sampling.interval_ms, 15_000);
        assert_eq!(config.device_id(), "esp32_s3_temp_sensor");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config = AgentConfig::from_toml_str(
            r#"
            [mqtt]
            broker = "localhost"
            qos = 0

            [sampling]
            filter_samples = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.mqtt.broker, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.qos, 0);
        assert_eq!(config.sampling.filter_samples, 3);
        assert_eq!(config.led.num_leds, 1);
    }

    #[test]
    fn validation_reports_every_problem() {
        let mut config = AgentConfig::default();
        config.mqtt.broker.clear();
        config.mqtt.port = 0;
        config.mqtt.qos = 3;
        config.led.num_leds = 0;
        config.sampling.interval_ms = 50;

        match config.validate() {
            Err(ConfigError::Invalid(errors)) => assert_eq!(errors.len(), 5),
            other => panic!("expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn log_levels_accept_common_names() {
        let mut settings = LogSettings {
            level: "warning".to_string(),
            debug: true,
        };
        assert_eq!(settings.level_filter(), Level::WARN);

        settings.level = "DEBUG".to_string();
        assert_eq!(settings.level_filter(), Level::DEBUG);

        settings.debug = false;
        assert_eq!(settings.level_filter(), Level::INFO);

        settings.level = "verbose".to_string();
        assert_eq!(settings.level_filter(), Level::INFO);
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AgentConfig::default();
        config.device.id = "greenhouse".to_string();
        config.save(&path).await.unwrap();

        let loaded = AgentConfig::load(Some(&path)).await.unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.device_id(), "greenhouse");
    }

    #[tokio::test]
    async fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(matches!(
            AgentConfig::load(Some(&path)).await,
            Err(ConfigError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn ensure_default_config_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        AgentConfig::ensure_default_config(&path).await.unwrap();
        let first = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(AgentConfig::from_toml_str(&first).unwrap(), AgentConfig::default());

        tokio::fs::write(&path, "[device]\nid = \"kept\"\n").await.unwrap();
        AgentConfig::ensure_default_config(&path).await.unwrap();
        let second = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(second.contains("kept"));
    }
}
