//! The on-device sensor agent.
//!
//! Samples the temperature source on a fixed interval, publishes readings to the
//! temperature topic and applies LED commands received on the control topic. Failures are
//! counted per kind; hitting the limit triggers the recovery for that kind (MQTT restart,
//! or skipping the sample for sensor reads).

pub mod error_counter;
pub mod sensor_agent;

pub use error_counter::{ErrorCounters, FailureKind, FailureOutcome};
pub use sensor_agent::{handle_control_message, take_reading, ControlOutcome, SensorAgent};

use crate::config::ConfigError;
use crate::led::LedError;
use crate::mqtt::MqttError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LED error: {0}")]
    Led(#[from] LedError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),
}
