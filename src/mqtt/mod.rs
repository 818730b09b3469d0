//! # MQTT Integration Module
//!
//! Broker connectivity shared by the sensor agent, the switch command and the monitor.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker, credential and topic settings
//! ├── message_manager.rs  - Inbound message and telemetry payload types
//! └── mqtt_handler.rs     - Client, event loop task and connection status
//! ```
//!
//! The event loop runs in its own tokio task. Connection state is published through a
//! `watch` channel so callers can check it without touching the client, and incoming
//! publishes arrive on an `mpsc` channel handed in at spawn time.
//!
//! rumqttc reconnects on the next poll after a failure, so recovery is a matter of
//! waiting `retry_delay_secs` and polling again. A full teardown is available through
//! [`mqtt_handler::MqttHandler::restart`] for callers that want a fresh session.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;

pub use config::{qos_from_level, MqttConfig};
pub use message_manager::{MQTTMessage, TemperatureReading};
pub use mqtt_handler::{ConnectionState, MQTTStatus, MqttError, MqttHandler};
