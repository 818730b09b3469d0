//! # Persistence Module
//!
//! Device records the operator manages from the command line: sensors to watch, and
//! switches or lights that take on/off commands over MQTT. Records are stored as a
//! `[[device]]` list in a TOML file next to the agent config.
//!
//! ## Validation
//! Records are checked when they enter the registry, not when they are used. Entries edited
//! into the file by hand that fail the check are kept aside and written back unchanged, so a
//! later save never drops them.

pub mod device_registry;

pub use device_registry::DeviceRegistry;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse device registry: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize device registry: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid device {name:?}: {reason}")]
    InvalidDevice { name: String, reason: String },

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Device {0} does not accept on/off commands")]
    NotSwitchable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Publishes readings, never commanded
    Sensor,
    Switch,
    /// RGB light driven by JSON colour commands
    Light,
}

impl DeviceKind {
    pub fn is_switchable(self) -> bool {
        matches!(self, DeviceKind::Switch | DeviceKind::Light)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceKind::Sensor => write!(f, "sensor"),
            DeviceKind::Switch => write!(f, "switch"),
            DeviceKind::Light => write!(f, "light"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sensor" => Ok(DeviceKind::Sensor),
            "switch" => Ok(DeviceKind::Switch),
            "light" => Ok(DeviceKind::Light),
            other => Err(format!("unknown device kind {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    On,
    Off,
}

impl FromStr for SwitchState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" | "1" | "true" => Ok(SwitchState::On),
            "off" | "0" | "false" => Ok(SwitchState::Off),
            other => Err(format!("expected on or off, got {:?}", other)),
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SwitchState::On => write!(f, "on"),
            SwitchState::Off => write!(f, "off"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub name: String,
    pub kind: DeviceKind,
    /// Telemetry topic for sensors, command topic otherwise
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub off_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl DeviceRecord {
    pub fn sensor(name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DeviceKind::Sensor,
            topic: topic.into(),
            on_command: None,
            off_command: None,
            unit: Some("°C".to_string()),
        }
    }

    /// A light driven by the agent's control topic.
    pub fn led_light(name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DeviceKind::Light,
            topic: topic.into(),
            on_command: Some(r#"{"r":255,"g":255,"b":255,"brightness":1.0}"#.to_string()),
            off_command: Some(r#"{"brightness":0}"#.to_string()),
            unit: None,
        }
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidDevice {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if self.topic.trim().is_empty() {
            return Err(invalid("topic is empty"));
        }
        if self.kind.is_switchable() {
            if self.topic.contains(['+', '#']) {
                return Err(invalid("command topics cannot contain wildcards"));
            }
            if self.on_command.as_deref().map_or(true, str::is_empty)
                || self.off_command.as_deref().map_or(true, str::is_empty)
            {
                return Err(invalid("on and off commands are required"));
            }
        }
        Ok(())
    }

    pub fn command_payload(&self, state: SwitchState) -> Result<&str, RegistryError> {
        if !self.kind.is_switchable() {
            return Err(RegistryError::NotSwitchable(self.name.clone()));
        }
        let command = match state {
            SwitchState::On => self.on_command.as_deref(),
            SwitchState::Off => self.off_command.as_deref(),
        };
        command.ok_or_else(|| RegistryError::NotSwitchable(self.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_commands() {
        let light = DeviceRecord::led_light("desk", "esp32/s3/control");
        assert!(light.validate().is_ok());
        assert_eq!(
            light.command_payload(SwitchState::Off).unwrap(),
            r#"{"brightness":0}"#
        );
        assert!(light
            .command_payload(SwitchState::On)
            .unwrap()
            .contains("\"r\":255"));
    }

    #[test]
    fn sensors_cannot_be_switched() {
        let sensor = DeviceRecord::sensor("greenhouse", "sensors/+/temperature");
        assert!(sensor.validate().is_ok());
        assert!(matches!(
            sensor.command_payload(SwitchState::On),
            Err(RegistryError::NotSwitchable(_))
        ));
    }

    #[test]
    fn validation_rules() {
        let mut light = DeviceRecord::led_light("desk", "lights/#");
        assert!(light.validate().is_err());

        light.topic = "lights/desk".to_string();
        light.off_command = Some(String::new());
        assert!(light.validate().is_err());

        let unnamed = DeviceRecord::sensor(" ", "a/b");
        assert!(matches!(
            unnamed.validate(),
            Err(RegistryError::InvalidDevice { .. })
        ));
    }

    #[test]
    fn parses_cli_words() {
        assert_eq!("Light".parse::<DeviceKind>().unwrap(), DeviceKind::Light);
        assert!("lamp".parse::<DeviceKind>().is_err());
        assert_eq!("ON".parse::<SwitchState>().unwrap(), SwitchState::On);
        assert_eq!("0".parse::<SwitchState>().unwrap(), SwitchState::Off);
    }
}
