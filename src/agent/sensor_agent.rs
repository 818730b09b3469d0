//! Sensor agent with a statum lifecycle.
//!
//! ```text
//! Initializing ──► Running ──► ShuttingDown
//!   (LED, link,     (sample,    (LED off,
//!    MQTT connect)   control)    disconnect)
//! ```

use super::error_counter::{ErrorCounters, FailureKind};
use super::AgentError;
use crate::config::AgentConfig;
use crate::led::{ControlCommand, LedStrip};
use crate::mqtt::{MQTTMessage, MqttHandler, TemperatureReading};
use crate::network::LinkMonitor;
use crate::sensor::{BatteryGauge, SensorError, TemperatureSampler};
use statum::{machine, state};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CONTROL_QUEUE: usize = 32;

#[state]
#[derive(Debug, Clone)]
pub enum AgentState {
    Initializing,
    Running,
    ShuttingDown,
}

#[machine]
pub struct SensorAgent<S: AgentState> {
    config: AgentConfig,
    sampler: TemperatureSampler,
    battery: Option<BatteryGauge>,
    led: LedStrip,
    link: LinkMonitor,
    counters: ErrorCounters,
    mqtt: MqttHandler,
    control_rx: mpsc::Receiver<MQTTMessage>,
    started: Instant,
}

impl<S: AgentState> SensorAgent<S> {
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

impl SensorAgent<Initializing> {
    /// Builds every component from the config and starts the MQTT client.
    pub fn from_config(config: AgentConfig) -> Result<Self, AgentError> {
        config.validate()?;

        let sampler = TemperatureSampler::from_settings(&config.sampling);
        let battery = config
            .telemetry
            .include_battery
            .then(|| BatteryGauge::new(config.telemetry.battery_voltage_path.clone()));
        let led = LedStrip::from_settings(&config.led)?;
        let link = LinkMonitor::new(config.network.interface.clone());

        Self::create(config, sampler, battery, led, link)
    }

    pub fn create(
        config: AgentConfig,
        sampler: TemperatureSampler,
        battery: Option<BatteryGauge>,
        led: LedStrip,
        link: LinkMonitor,
    ) -> Result<Self, AgentError> {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);
        let mqtt = MqttHandler::spawn(
            config.mqtt.clone(),
            vec![config.mqtt.control_topic.clone()],
            control_tx,
        )?;
        let counters = ErrorCounters::new(config.device.max_error_count);

        Ok(Self::new(
            config,
            sampler,
            battery,
            led,
            link,
            counters,
            mqtt,
            control_rx,
            Instant::now(),
        ))
    }

    /// Brings up the LED and waits for the first broker connection.
    ///
    /// A down link only warns, since the OS may still be associating.
    pub async fn initialize(mut self) -> Result<SensorAgent<Running>, AgentError> {
        self.log_system_info();

        if let Err(e) = self.led.init() {
            error!("LED initialization failed: {}", e);
            self.mqtt.disconnect().await;
            return Err(e.into());
        }

        match self.link.status() {
            Ok(status) if status.is_up() => info!("Network ready: {}", status),
            Ok(status) => warn!("Network not ready yet: {}", status),
            Err(e) => warn!("Network check failed: {}", e),
        }

        let timeout = Duration::from_secs(self.config.mqtt.connect_timeout_secs);
        if let Err(e) = self.mqtt.wait_connected(timeout).await {
            error!("MQTT connection failed: {}", e);
            if let Err(led_err) = self.led.turn_off() {
                error!("Failed to switch off LED: {}", led_err);
            }
            self.mqtt.disconnect().await;
            return Err(e.into());
        }

        info!("Initialization complete");
        Ok(self.transition())
    }

    fn log_system_info(&self) {
        let config = &self.config;
        info!("System information:");
        info!("  - iotsensor version: {}", env!("CARGO_PKG_VERSION"));
        info!("  - Device ID: {}", config.device_id());
        info!(
            "  - Network interface: {} (SSID {})",
            config.network.interface,
            if config.network.ssid.is_empty() {
                "not set"
            } else {
                config.network.ssid.as_str()
            }
        );
        info!("  - MQTT broker: {}", config.mqtt.broker_addr());
        info!("  - Sampling interval: {}ms", config.sampling.interval_ms);
        info!("  - Temperature source: {}", self.sampler.describe());
        info!(
            "  - LEDs: {} via {:?}",
            config.led.num_leds, config.led.driver
        );
        info!(
            "  - Temperature filter: {}",
            if config.sampling.filter_enabled {
                format!("enabled, {} samples", config.sampling.filter_samples)
            } else {
                "disabled".to_string()
            }
        );
        info!(
            "  - Calibration offset: {}°C",
            config.sampling.calibration_offset
        );
        info!("  - Log level: {}", config.logging.level);
    }
}

impl SensorAgent<Running> {
    pub async fn run(mut self, cancel: CancellationToken) -> SensorAgent<ShuttingDown> {
        info!("Entering main loop");

        let mut status_tick = tokio::time::interval(Duration::from_secs(
            self.config.network.status_check_interval_secs.max(1),
        ));
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sample_tick =
            tokio::time::interval(Duration::from_millis(self.config.sampling.interval_ms));
        sample_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = status_tick.tick() => self.check_status().await,
                _ = sample_tick.tick() => self.sample_and_publish().await,
                Some(msg) = self.control_rx.recv() => {
                    handle_control_message(&mut self.led, &self.config.mqtt.control_topic, &msg);
                }
            }
        }

        self.transition()
    }

    async fn check_status(&mut self) {
        match self.link.status() {
            Ok(status) if status.is_up() => {
                debug!("Network status: {}", status);
                if let Some(previous) = self.counters.record_success(FailureKind::Network) {
                    info!("Network recovered after {} failed check(s)", previous);
                }
            }
            Ok(status) => self.network_failure(&status.to_string()).await,
            Err(e) => self.network_failure(&e.to_string()).await,
        }

        let mqtt = self.mqtt.status();
        info!(
            "MQTT {:?}: {} sent, {} received, {} restart(s)",
            mqtt.connection_state, mqtt.messages_sent, mqtt.messages_received, mqtt.restarts
        );
    }

    async fn network_failure(&mut self, reason: &str) {
        let outcome = self.counters.record_failure(FailureKind::Network);
        error!(
            "Network check failed ({}/{}): {}",
            outcome.count,
            self.counters.max(),
            reason
        );
        if outcome.limit_reached {
            error!("Too many network failures, restarting MQTT session");
            self.mqtt.restart().await;
        }
    }

    async fn sample_and_publish(&mut self) {
        if !self.mqtt.is_connected() {
            let outcome = self.counters.record_failure(FailureKind::Mqtt);
            error!(
                "MQTT not connected ({}/{}), skipping sample",
                outcome.count,
                self.counters.max()
            );
            if outcome.limit_reached {
                error!("Too many MQTT failures, restarting connection");
                self.mqtt.restart().await;
            }
            return;
        }
        if let Some(previous) = self.counters.record_success(FailureKind::Mqtt) {
            info!("MQTT connection recovered after {} failure(s)", previous);
        }

        let Some(reading) = self.read_sample() else {
            return;
        };

        let topic = self.config.mqtt.temperature_topic.clone();
        match self.mqtt.publish_json(&topic, &reading).await {
            Ok(()) => {
                debug!("Published temperature {:.2}°C", reading.temperature);
                if let Some(previous) = self.counters.record_success(FailureKind::Temperature) {
                    info!("Temperature publishing recovered after {} failure(s)", previous);
                }
            }
            Err(e) => {
                let outcome = self.counters.record_failure(FailureKind::Temperature);
                error!(
                    "Failed to publish temperature ({}/{}): {}",
                    outcome.count,
                    self.counters.max(),
                    e
                );
                if outcome.limit_reached {
                    error!("Too many publish failures, restarting MQTT connection");
                    self.mqtt.restart().await;
                }
            }
        }
    }

    /// A failed read counts against the temperature limit and skips this sample.
    fn read_sample(&mut self) -> Option<TemperatureReading> {
        match take_reading(
            &mut self.sampler,
            self.battery.as_ref(),
            self.config.device_id(),
            self.started,
        ) {
            Ok(reading) => Some(reading),
            Err(e) => {
                let outcome = self.counters.record_failure(FailureKind::Temperature);
                error!(
                    "Temperature read failed ({}/{}): {}",
                    outcome.count,
                    self.counters.max(),
                    e
                );
                if outcome.limit_reached {
                    error!("Too many temperature read failures, skipping this sample");
                }
                None
            }
        }
    }
}

impl SensorAgent<ShuttingDown> {
    pub async fn cleanup(mut self) {
        info!("Cleaning up resources");

        match self.led.turn_off() {
            Ok(()) => debug!("LED switched off"),
            Err(e) => error!("Failed to switch off LED: {}", e),
        }

        self.mqtt.disconnect().await;
        info!("Cleanup complete");
    }
}

/// Reads the sampler and, when configured, the battery gauge.
///
/// A battery failure only drops the field from the reading.
pub fn take_reading(
    sampler: &mut TemperatureSampler,
    battery: Option<&BatteryGauge>,
    device_id: &str,
    started: Instant,
) -> Result<TemperatureReading, SensorError> {
    let temperature = sampler.read()?;
    let mut reading =
        TemperatureReading::new(temperature, started.elapsed().as_millis() as u64, device_id);

    if let Some(gauge) = battery {
        match gauge.read_volts() {
            Ok(volts) => reading = reading.with_battery(volts),
            Err(e) => warn!("Failed to read battery voltage: {}", e),
        }
    }
    Ok(reading)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    WrongTopic,
    Rejected,
    Unchanged,
    Updated,
    DriverFailed,
}

pub fn handle_control_message(
    led: &mut LedStrip,
    control_topic: &str,
    msg: &MQTTMessage,
) -> ControlOutcome {
    debug!("Control message: {}", msg);

    if msg.topic != control_topic {
        warn!("Message on unexpected topic {}", msg.topic);
        return ControlOutcome::WrongTopic;
    }

    let command = match ControlCommand::parse(&msg.payload) {
        Ok(command) => command,
        Err(e) => {
            error!("Rejected control message: {}", e);
            return ControlOutcome::Rejected;
        }
    };
    for key in &command.unknown_keys {
        warn!("Control message contains unknown key: {}", key);
    }

    match led.apply_command(&command) {
        Ok(true) => {
            let state = led.state();
            info!(
                "LED updated: R={} G={} B={} brightness={}",
                state.r, state.g, state.b, state.brightness
            );
            ControlOutcome::Updated
        }
        Ok(false) => {
            debug!("LED state unchanged");
            ControlOutcome::Unchanged
        }
        Err(e) => {
            error!("Failed to update LED: {}", e);
            ControlOutcome::DriverFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::led::{LedDriver, LedError, LedState, LogDriver, Rgb};
    use crate::mqtt::MqttError;
    use crate::sensor::{TemperatureFilter, ThermalZoneSource};
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    const CONTROL: &str = "esp32/s3/control";

    fn ready_strip() -> LedStrip {
        let mut strip = LedStrip::new(Box::new(LogDriver::new()), 1, LedState::default());
        strip.init().unwrap();
        strip
    }

    #[test]
    fn control_messages_drive_the_led() {
        let mut led = ready_strip();

        let msg = MQTTMessage::from_topic(CONTROL, r#"{"r": 255, "brightness": 1}"#);
        assert_eq!(
            handle_control_message(&mut led, CONTROL, &msg),
            ControlOutcome::Updated
        );
        assert_eq!(led.state().scaled(), (255, 0, 0));

        assert_eq!(
            handle_control_message(&mut led, CONTROL, &msg),
            ControlOutcome::Unchanged
        );
    }

    #[test]
    fn foreign_and_broken_messages_are_ignored() {
        let mut led = ready_strip();
        let before = led.state();

        let other = MQTTMessage::from_topic("other/topic", r#"{"r": 1}"#);
        assert_eq!(
            handle_control_message(&mut led, CONTROL, &other),
            ControlOutcome::WrongTopic
        );

        let broken = MQTTMessage::from_topic(CONTROL, "{\"r\": ");
        assert_eq!(
            handle_control_message(&mut led, CONTROL, &broken),
            ControlOutcome::Rejected
        );
        assert_eq!(led.state(), before);
    }

    #[test]
    fn uninitialized_strip_reports_driver_failure() {
        let mut led = LedStrip::new(Box::new(LogDriver::new()), 1, LedState::default());
        let msg = MQTTMessage::from_topic(CONTROL, r#"{"g": 10}"#);
        assert_eq!(
            handle_control_message(&mut led, CONTROL, &msg),
            ControlOutcome::DriverFailed
        );
    }

    #[test]
    fn readings_include_battery_when_available() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("temp");
        let volts = dir.path().join("voltage_now");
        std::fs::write(&temp, "25126").unwrap();
        std::fs::write(&volts, "4012000").unwrap();

        let mut sampler = TemperatureSampler::new(
            Box::new(ThermalZoneSource::new(&temp)),
            TemperatureFilter::new(0.0, false, 5),
        );
        let gauge = BatteryGauge::new(&volts);

        let reading = take_reading(&mut sampler, Some(&gauge), "node-1", Instant::now()).unwrap();
        assert_eq!(reading.temperature, 25.13);
        assert_eq!(reading.battery, Some(4.01));
        assert_eq!(reading.device_id, "node-1");

        std::fs::remove_file(&volts).unwrap();
        let without = take_reading(&mut sampler, Some(&gauge), "node-1", Instant::now()).unwrap();
        assert_eq!(without.battery, None);

        std::fs::remove_file(&temp).unwrap();
        assert!(take_reading(&mut sampler, None, "node-1", Instant::now()).is_err());
    }

    #[derive(Clone, Default)]
    struct RecordingDriver(Arc<Mutex<Vec<Vec<Rgb>>>>);

    impl LedDriver for RecordingDriver {
        fn write(&mut self, pixels: &[Rgb]) -> Result<(), LedError> {
            self.0.lock().unwrap().push(pixels.to_vec());
            Ok(())
        }
    }

    /// Accepts the init frame, fails every write after it.
    #[derive(Default)]
    struct BrokenAfterInit {
        writes: usize,
    }

    impl LedDriver for BrokenAfterInit {
        fn write(&mut self, _pixels: &[Rgb]) -> Result<(), LedError> {
            self.writes += 1;
            if self.writes > 1 {
                Err(LedError::InvalidSpiBus(9))
            } else {
                Ok(())
            }
        }
    }

    /// Agent pointed at a closed local port, reading `dir/temp`.
    fn offline_agent(dir: &Path, driver: Box<dyn LedDriver>) -> SensorAgent<Initializing> {
        std::fs::write(dir.join("temp"), "21500").unwrap();

        let mut config = AgentConfig::default();
        config.device.max_error_count = 3;
        config.mqtt.broker = "127.0.0.1".to_string();
        config.mqtt.port = 1;
        config.mqtt.retry_delay_secs = 1;
        config.mqtt.connect_timeout_secs = 1;

        let sampler = TemperatureSampler::new(
            Box::new(ThermalZoneSource::new(dir.join("temp"))),
            TemperatureFilter::new(0.0, false, 5),
        );
        let led = LedStrip::new(driver, 1, LedState::new((10, 20, 30), 1.0));
        let link = LinkMonitor::with_roots("wlan0", dir.join("net"), dir.join("wireless"));

        SensorAgent::create(config, sampler, None, led, link).unwrap()
    }

    #[tokio::test]
    async fn startup_fails_without_broker_and_leaves_led_off() {
        let dir = tempfile::tempdir().unwrap();
        let driver = RecordingDriver::default();
        let agent = offline_agent(dir.path(), Box::new(driver.clone()));

        let result = agent.initialize().await;
        assert!(matches!(
            result,
            Err(AgentError::Mqtt(MqttError::ConnectTimeout(_)))
        ));

        let frames = driver.0.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], vec![(0, 0, 0)]);
    }

    #[tokio::test]
    async fn led_failure_during_failed_startup_keeps_mqtt_error() {
        let dir = tempfile::tempdir().unwrap();
        let agent = offline_agent(dir.path(), Box::new(BrokenAfterInit::default()));

        assert!(matches!(
            agent.initialize().await,
            Err(AgentError::Mqtt(MqttError::ConnectTimeout(_)))
        ));
    }

    #[tokio::test]
    async fn mqtt_failure_limit_restarts_connection() {
        let dir = tempfile::tempdir().unwrap();
        let mut running: SensorAgent<Running> =
            offline_agent(dir.path(), Box::new(LogDriver::new())).transition();

        running.sample_and_publish().await;
        running.sample_and_publish().await;
        assert_eq!(running.counters.count(FailureKind::Mqtt), 2);
        assert_eq!(running.mqtt.status().restarts, 0);

        running.sample_and_publish().await;
        assert_eq!(running.mqtt.status().restarts, 1);
        assert_eq!(running.counters.count(FailureKind::Mqtt), 0);

        let stopping: SensorAgent<ShuttingDown> = running.transition();
        stopping.cleanup().await;
    }

    #[tokio::test]
    async fn failed_reads_are_skipped_and_counter_resets_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut running: SensorAgent<Running> =
            offline_agent(dir.path(), Box::new(LogDriver::new())).transition();

        let reading = running.read_sample().unwrap();
        assert_eq!(reading.temperature, 21.5);

        std::fs::remove_file(dir.path().join("temp")).unwrap();
        assert!(running.read_sample().is_none());
        assert!(running.read_sample().is_none());
        assert_eq!(running.counters.count(FailureKind::Temperature), 2);

        assert!(running.read_sample().is_none());
        assert_eq!(running.counters.count(FailureKind::Temperature), 0);

        let stopping: SensorAgent<ShuttingDown> = running.transition();
        stopping.cleanup().await;
    }

    #[tokio::test]
    async fn run_applies_control_messages_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let driver = RecordingDriver::default();
        let mut running: SensorAgent<Running> =
            offline_agent(dir.path(), Box::new(driver.clone())).transition();
        running.led.init().unwrap();

        let (control_tx, control_rx) = mpsc::channel(4);
        running.control_rx = control_rx;
        control_tx
            .send(MQTTMessage::from_topic(
                CONTROL,
                r#"{"r": 255, "brightness": 1}"#,
            ))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let stopping = running.run(cancel).await;
        assert_eq!(
            driver.0.lock().unwrap().last().unwrap(),
            &vec![(255, 20, 30)]
        );

        stopping.cleanup().await;
        assert_eq!(driver.0.lock().unwrap().last().unwrap(), &vec![(0, 0, 0)]);
    }
}
