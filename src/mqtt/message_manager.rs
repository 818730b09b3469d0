use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

const PREVIEW_CHARS: usize = 40;

/// An inbound publish as handed to the rest of the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MQTTMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp: NaiveDateTime,
}

impl fmt::Display for MQTTMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let content = self.content();
        let mut preview: String = content.chars().take(PREVIEW_CHARS).collect();
        if content.chars().count() > PREVIEW_CHARS {
            preview.push('…');
        }
        write!(f, "{} - {}: {}", self.timestamp, self.topic, preview)
    }
}

impl MQTTMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        MQTTMessage {
            topic: topic.into(),
            payload: payload.into(),
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    pub fn content(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

fn default_unit() -> String {
    "°C".to_string()
}

/// Telemetry document published on the temperature topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    pub temperature: f64,
    /// Milliseconds since the publishing agent started
    pub timestamp: u64,
    pub device_id: String,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
}

impl TemperatureReading {
    pub fn new(temperature: f64, timestamp: u64, device_id: impl Into<String>) -> Self {
        Self {
            temperature: (temperature * 100.0).round() / 100.0,
            timestamp,
            device_id: device_id.into(),
            unit: default_unit(),
            battery: None,
        }
    }

    pub fn with_battery(mut self, volts: f64) -> Self {
        self.battery = Some(volts);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preview_is_truncated() {
        let msg = MQTTMessage::from_topic("t", "x".repeat(100));
        let rendered = msg.to_string();
        assert!(rendered.ends_with('…'));
        assert!(rendered.contains(&"x".repeat(40)));
        assert!(!rendered.contains(&"x".repeat(41)));

        let short = MQTTMessage::from_topic("t", "hi");
        assert!(short.to_string().ends_with("t: hi"));
    }

    #[test]
    fn reading_serializes_to_expected_json() {
        let reading = TemperatureReading::new(23.4567, 15_000, "esp32_s3_temp_sensor");
        let value = serde_json::to_value(&reading).unwrap();
        assert_eq!(
            value,
            json!({
                "temperature": 23.46,
                "timestamp": 15000,
                "device_id": "esp32_s3_temp_sensor",
                "unit": "°C"
            })
        );

        let with_battery = serde_json::to_value(reading.with_battery(3.3)).unwrap();
        assert_eq!(with_battery["battery"], json!(3.3));
    }

    #[test]
    fn reading_parses_without_optional_fields() {
        let reading: TemperatureReading =
            serde_json::from_str(r#"{"temperature": 21.5, "timestamp": 1, "device_id": "a"}"#)
                .unwrap();
        assert_eq!(reading.unit, "°C");
        assert_eq!(reading.battery, None);
    }
}
