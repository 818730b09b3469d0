use rumqttc::QoS;
use serde::{Deserialize, Serialize};

use super::mqtt_handler::MqttError;

/// Broker connection and topic settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    /// Empty means no authentication
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u64,
    /// QoS level 0-2 for publishes and the control subscription
    pub qos: u8,
    pub temperature_topic: String,
    pub control_topic: String,
    /// Seconds to wait before polling again after a connection error
    pub retry_delay_secs: u64,
    /// Seconds to wait for the first ConnAck during startup
    pub connect_timeout_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "mqtt.eclipseprojects.io".to_string(),
            port: 1883,
            client_id: "esp32_s3_temp_sensor".to_string(),
            username: String::new(),
            password: String::new(),
            keep_alive_secs: 60,
            qos: 1,
            temperature_topic: "esp32/s3/temperature".to_string(),
            control_topic: "esp32/s3/control".to_string(),
            retry_delay_secs: 5,
            connect_timeout_secs: 15,
        }
    }
}

impl MqttConfig {
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }

    pub fn qos(&self) -> Result<QoS, MqttError> {
        qos_from_level(self.qos)
    }

    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }
}

pub fn qos_from_level(level: u8) -> Result<QoS, MqttError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(MqttError::InvalidQos(other)),
    }
}
