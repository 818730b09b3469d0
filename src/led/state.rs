//! LED colour state and the JSON control messages that change it.
//!
//! Control payloads look like `{"r": 255, "g": 0, "b": 64, "brightness": 0.8}`. Every key is
//! optional. Values may be numbers or numeric strings; colours are truncated and clamped to
//! 0-255, brightness to 0.0-1.0.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const KNOWN_KEYS: [&str; 4] = ["r", "g", "b", "brightness"];

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid JSON control message: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Control message is not a JSON object")]
    NotAnObject,

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedState {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub brightness: f32,
}

impl Default for LedState {
    fn default() -> Self {
        Self {
            r: 0,
            g: 0,
            b: 0,
            brightness: 0.5,
        }
    }
}

impl LedState {
    pub fn new(color: (u8, u8, u8), brightness: f32) -> Self {
        Self {
            r: color.0,
            g: color.1,
            b: color.2,
            brightness: brightness.clamp(0.0, 1.0),
        }
    }

    /// Colour after brightness scaling, as written to the strip.
    pub fn scaled(&self) -> (u8, u8, u8) {
        let scale = |channel: u8| (channel as f32 * self.brightness).clamp(0.0, 255.0) as u8;
        (scale(self.r), scale(self.g), scale(self.b))
    }

    /// Applies the fields present in `command`. Returns true when anything changed.
    pub fn apply(&mut self, command: &ControlCommand) -> bool {
        let mut updated = false;

        for (target, value) in [
            (&mut self.r, command.r),
            (&mut self.g, command.g),
            (&mut self.b, command.b),
        ] {
            if let Some(value) = value {
                if *target != value {
                    *target = value;
                    updated = true;
                }
            }
        }

        if let Some(brightness) = command.brightness {
            if self.brightness != brightness {
                self.brightness = brightness;
                updated = true;
            }
        }

        updated
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlCommand {
    pub r: Option<u8>,
    pub g: Option<u8>,
    pub b: Option<u8>,
    pub brightness: Option<f32>,
    /// Keys that were present but are not understood
    pub unknown_keys: Vec<String>,
}

impl ControlCommand {
    /// Parses a control payload. Any invalid value rejects the whole command.
    pub fn parse(payload: &[u8]) -> Result<Self, CommandError> {
        let value: Value = serde_json::from_slice(payload)?;
        let Value::Object(map) = value else {
            return Err(CommandError::NotAnObject);
        };

        let unknown_keys = map
            .keys()
            .filter(|key| !KNOWN_KEYS.contains(&key.as_str()))
            .cloned()
            .collect();

        Ok(Self {
            r: channel(&map, "r")?,
            g: channel(&map, "g")?,
            b: channel(&map, "b")?,
            brightness: number(&map, "brightness")?.map(|v| v.clamp(0.0, 1.0) as f32),
            unknown_keys,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.r.is_none() && self.g.is_none() && self.b.is_none() && self.brightness.is_none()
    }
}

fn channel(map: &Map<String, Value>, key: &'static str) -> Result<Option<u8>, CommandError> {
    Ok(number(map, key)?.map(|v| v.trunc().clamp(0.0, 255.0) as u8))
}

fn number(map: &Map<String, Value>, key: &'static str) -> Result<Option<f64>, CommandError> {
    let Some(value) = map.get(key) else {
        return Ok(None);
    };
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(CommandError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_clamps_values() {
        let command =
            ControlCommand::parse(br#"{"r": 300, "g": -4, "b": "64.9", "brightness": 2}"#)
                .unwrap();
        assert_eq!(command.r, Some(255));
        assert_eq!(command.g, Some(0));
        assert_eq!(command.b, Some(64));
        assert_eq!(command.brightness, Some(1.0));
        assert!(command.unknown_keys.is_empty());
    }

    #[test]
    fn keeps_track_of_unknown_keys() {
        let command = ControlCommand::parse(br#"{"g": 10, "mode": "blink"}"#).unwrap();
        assert_eq!(command.g, Some(10));
        assert_eq!(command.unknown_keys, vec!["mode".to_string()]);
        assert!(!command.is_empty());

        let nothing = ControlCommand::parse(br#"{"mode": "blink"}"#).unwrap();
        assert!(nothing.is_empty());
    }

    #[test]
    fn rejects_malformed_messages() {
        assert!(matches!(
            ControlCommand::parse(b"not json"),
            Err(CommandError::InvalidJson(_))
        ));
        assert!(matches!(
            ControlCommand::parse(b"[1, 2, 3]"),
            Err(CommandError::NotAnObject)
        ));
        assert!(matches!(
            ControlCommand::parse(br#"{"r": 10, "g": "green"}"#),
            Err(CommandError::InvalidValue { key: "g", .. })
        ));
        assert!(matches!(
            ControlCommand::parse(br#"{"brightness": null}"#),
            Err(CommandError::InvalidValue { key: "brightness", .. })
        ));
    }

    #[test]
    fn apply_reports_changes_only() {
        let mut state = LedState::new((0, 0, 0), 0.5);
        let command = ControlCommand::parse(br#"{"r": 200, "brightness": 0.5}"#).unwrap();

        assert!(state.apply(&command));
        assert_eq!(state.r, 200);
        assert!(!state.apply(&command));
    }

    #[test]
    fn scaling_truncates() {
        let state = LedState::new((255, 100, 3), 0.5);
        assert_eq!(state.scaled(), (127, 50, 1));

        let off = LedState::new((255, 255, 255), 0.0);
        assert_eq!(off.scaled(), (0, 0, 0));
    }
}
