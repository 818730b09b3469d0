use super::history::{ChartPeriod, TelemetryHistory, TelemetrySample};
use crate::mqtt::{MQTTMessage, MqttConfig, MqttHandler, TemperatureReading};
use chrono::{DateTime, Utc};
use color_eyre::{eyre::WrapErr, Result};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Subscribes to a telemetry topic and keeps a chart history per device.
pub struct Monitor {
    topic: String,
    period: ChartPeriod,
    /// Samples kept per device, one chart period at the expected sample interval
    capacity: usize,
    report_every: Duration,
    histories: BTreeMap<String, TelemetryHistory>,
}

impl Monitor {
    pub fn new(
        topic: impl Into<String>,
        period: ChartPeriod,
        sample_interval: Duration,
        report_every: Duration,
    ) -> Self {
        Self {
            topic: topic.into(),
            period,
            capacity: TelemetryHistory::capacity_for(period, sample_interval),
            report_every,
            histories: BTreeMap::new(),
        }
    }

    pub fn record(
        &mut self,
        msg: &MQTTMessage,
        at: DateTime<Utc>,
    ) -> Result<TemperatureReading, serde_json::Error> {
        let reading: TemperatureReading = serde_json::from_slice(&msg.payload)?;
        self.histories
            .entry(reading.device_id.clone())
            .or_insert_with(|| TelemetryHistory::new(self.capacity))
            .push(TelemetrySample {
                at,
                celsius: reading.temperature,
            });
        Ok(reading)
    }

    pub fn history(&self, device_id: &str) -> Option<&TelemetryHistory> {
        self.histories.get(device_id)
    }

    /// One line per device: latest value plus the populated buckets of the chart period.
    pub fn summary(&self, now: DateTime<Utc>) -> String {
        if self.histories.is_empty() {
            return format!("no readings on {} yet", self.topic);
        }

        let mut out = String::new();
        for (device, history) in &self.histories {
            let latest = history.latest().map(|s| s.celsius).unwrap_or_default();
            let _ = write!(out, "{}: latest {:.2}°C", device, latest);

            let series = history.series(self.period, now);
            let populated: Vec<String> = series
                .iter()
                .filter_map(|bucket| {
                    bucket.stats.map(|stats| {
                        format!(
                            "{} avg {:.2} [{:.2}..{:.2}] n={}",
                            bucket.start.format("%m-%d %H:%M"),
                            stats.avg,
                            stats.min,
                            stats.max,
                            stats.count
                        )
                    })
                })
                .collect();
            if populated.is_empty() {
                let _ = write!(out, ", nothing in the last {}", self.period);
            } else {
                let _ = write!(out, ", last {}: {}", self.period, populated.join(" | "));
            }
            out.push('\n');
        }
        out.truncate(out.trim_end().len());
        out
    }

    /// Fails when the broker is not reached within `connect_timeout_secs`.
    pub async fn run(mut self, config: MqttConfig, cancel: CancellationToken) -> Result<()> {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let (tx, mut rx) = mpsc::channel(100);
        let handler = MqttHandler::spawn(config, vec![self.topic.clone()], tx)
            .wrap_err("Failed to start MQTT client")?;

        let connected = tokio::select! {
            _ = cancel.cancelled() => None,
            connected = handler.wait_connected(connect_timeout) => Some(connected),
        };
        match connected {
            None => {
                handler.disconnect().await;
                return Ok(());
            }
            Some(Err(e)) => {
                handler.disconnect().await;
                return Err(e).wrap_err("Could not reach the broker");
            }
            Some(Ok(())) => {}
        }
        info!("Monitoring {} ({} chart)", self.topic, self.period);

        let mut report = tokio::time::interval(self.report_every);
        report.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    match self.record(&msg, Utc::now()) {
                        Ok(reading) => debug!(
                            "{} reported {:.2}{}",
                            reading.device_id, reading.temperature, reading.unit
                        ),
                        Err(e) => warn!("Ignoring message on {}: {}", msg.topic, e),
                    }
                }
                _ = report.tick() => {
                    info!("\n{}", self.summary(Utc::now()));
                }
            }
        }

        info!("\n{}", self.summary(Utc::now()));
        handler.disconnect().await;
        Ok(())
    }
}
