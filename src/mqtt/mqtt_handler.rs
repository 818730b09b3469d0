use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::MQTTMessage;

/// How many recent connection errors `MQTTStatus` keeps
const MAX_ERROR_HISTORY: usize = 10;
const REQUEST_CAPACITY: usize = 100;
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("Invalid QoS level {0}, expected 0-2")]
    InvalidQos(u8),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("MQTT event loop stopped")]
    EventLoopStopped,

    #[error("Client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Broker refused the connection
    Failed,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MQTTStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub restarts: usize,
    pub last_activity: Option<DateTime<Local>>,
}

impl MQTTStatus {
    fn push_error(&mut self, message: String) {
        if self.error_messages.len() >= MAX_ERROR_HISTORY {
            self.error_messages.remove(0);
        }
        self.error_messages.push(message);
    }
}

/// Owns a rumqttc client and the task driving its event loop.
///
/// The event loop re-subscribes to every topic in `subscriptions` after each ConnAck and
/// forwards incoming publishes to the `inbound` channel.
pub struct MqttHandler {
    config: MqttConfig,
    qos: QoS,
    subscriptions: Vec<String>,
    inbound: mpsc::Sender<MQTTMessage>,
    status: Arc<watch::Sender<MQTTStatus>>,
    client: AsyncClient,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MqttHandler {
    pub fn spawn(
        config: MqttConfig,
        subscriptions: Vec<String>,
        inbound: mpsc::Sender<MQTTMessage>,
    ) -> Result<Self, MqttError> {
        let qos = config.qos()?;
        let (status, _) = watch::channel(MQTTStatus::default());
        let status = Arc::new(status);

        info!(
            "Connecting to MQTT broker {} as {}",
            config.broker_addr(),
            config.client_id
        );
        let (client, cancel, task) =
            start_event_loop(&config, qos, &subscriptions, inbound.clone(), status.clone());

        Ok(Self {
            config,
            qos,
            subscriptions,
            inbound,
            status,
            client,
            cancel,
            task: Some(task),
        })
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    pub fn status(&self) -> MQTTStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<MQTTStatus> {
        self.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().connection_state == ConnectionState::Connected
    }

    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), MqttError> {
        let mut rx = self.status.subscribe();
        let result = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| s.connection_state == ConnectionState::Connected),
        )
        .await;
        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(MqttError::EventLoopStopped),
            Err(_) => Err(MqttError::ConnectTimeout(self.config.broker_addr())),
        }
    }

    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        self.client.publish(topic, self.qos, false, payload).await?;
        self.status.send_modify(|s| {
            s.messages_sent += 1;
            s.last_activity = Some(Local::now());
        });
        debug!("Published to {}", topic);
        Ok(())
    }

    pub async fn publish_json<T: Serialize>(&self, topic: &str, value: &T) -> Result<(), MqttError> {
        let payload = serde_json::to_vec(value)?;
        self.publish(topic, payload).await
    }

    /// Drops the current connection and starts a fresh client and event loop.
    pub async fn restart(&mut self) {
        warn!("Restarting MQTT connection to {}", self.config.broker_addr());
        self.shutdown_current().await;

        let (client, cancel, task) = start_event_loop(
            &self.config,
            self.qos,
            &self.subscriptions,
            self.inbound.clone(),
            self.status.clone(),
        );
        self.client = client;
        self.cancel = cancel;
        self.task = Some(task);
        self.status.send_modify(|s| s.restarts += 1);
    }

    pub async fn disconnect(mut self) {
        info!("Disconnecting from MQTT broker {}", self.config.broker_addr());
        self.shutdown_current().await;
    }

    async fn shutdown_current(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request not queued: {}", e);
        }
        if let Some(mut task) = self.task.take() {
            let joined = match tokio::time::timeout(DISCONNECT_GRACE, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    debug!("Event loop did not stop in time, cancelling");
                    self.cancel.cancel();
                    task.await
                }
            };
            log_event_loop_exit(joined);
        }
        self.cancel.cancel();
    }
}

/// Returns false when the event loop task panicked or was aborted.
fn log_event_loop_exit(joined: Result<(), JoinError>) -> bool {
    match joined {
        Ok(()) => true,
        Err(e) => {
            warn!("MQTT event loop task failed: {}", e);
            false
        }
    }
}

fn start_event_loop(
    config: &MqttConfig,
    qos: QoS,
    subscriptions: &[String],
    inbound: mpsc::Sender<MQTTMessage>,
    status: Arc<watch::Sender<MQTTStatus>>,
) -> (AsyncClient, CancellationToken, JoinHandle<()>) {
    let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    if config.has_credentials() {
        options.set_credentials(&config.username, &config.password);
    }

    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_event_loop(
        eventloop,
        client.clone(),
        subscriptions.to_vec(),
        qos,
        inbound,
        status,
        Duration::from_secs(config.retry_delay_secs),
        cancel.clone(),
    ));
    (client, cancel, task)
}

#[allow(clippy::too_many_arguments)]
async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Vec<String>,
    qos: QoS,
    inbound: mpsc::Sender<MQTTMessage>,
    status: Arc<watch::Sender<MQTTStatus>>,
    retry_delay: Duration,
    cancel: CancellationToken,
) {
    status.send_modify(|s| s.connection_state = ConnectionState::Connecting);

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("MQTT connected (session present: {})", ack.session_present);
                status.send_modify(|s| {
                    s.connection_state = ConnectionState::Connected;
                    s.last_activity = Some(Local::now());
                });
                for topic in &subscriptions {
                    match client.try_subscribe(topic, qos) {
                        Ok(_) => info!("Subscribing to {}", topic),
                        Err(e) => error!("Failed to subscribe to {}: {}", topic, e),
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let msg = MQTTMessage::from_topic(publish.topic.clone(), publish.payload.to_vec());
                debug!("Received {}", msg);
                status.send_modify(|s| {
                    s.messages_received += 1;
                    s.last_activity = Some(Local::now());
                });
                if let Err(e) = inbound.try_send(msg) {
                    warn!("Dropping message on {}: {}", publish.topic, e);
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!("Subscription acknowledged: {:?}", ack.return_codes);
            }
            Ok(Event::Incoming(Packet::PingResp)) => {
                debug!("MQTT ping acknowledged");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker closed the session");
                status.send_modify(|s| s.connection_state = ConnectionState::Reconnecting);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                let state = match e {
                    ConnectionError::ConnectionRefused(_) => ConnectionState::Failed,
                    _ => ConnectionState::Reconnecting,
                };
                error!(
                    "MQTT connection error: {}, retrying in {}s",
                    e,
                    retry_delay.as_secs()
                );
                status.send_modify(|s| {
                    s.connection_state = state;
                    s.push_error(e.to_string());
                });
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }

    status.send_modify(|s| s.connection_state = ConnectionState::Disconnected);
    debug!("MQTT event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_broker() -> MqttConfig {
        MqttConfig {
            broker: "127.0.0.1".to_string(),
            // Reserved port, nothing listens here
            port: 1,
            retry_delay_secs: 1,
            ..MqttConfig::default()
        }
    }

    #[test]
    fn error_history_is_bounded() {
        let mut status = MQTTStatus::default();
        for i in 0..15 {
            status.push_error(format!("error {}", i));
        }
        assert_eq!(status.error_messages.len(), MAX_ERROR_HISTORY);
        assert_eq!(status.error_messages[0], "error 5");
    }

    #[test]
    fn rejects_invalid_qos() {
        let (tx, _rx) = mpsc::channel(1);
        let config = MqttConfig {
            qos: 7,
            ..MqttConfig::default()
        };
        assert!(matches!(
            MqttHandler::spawn(config, Vec::new(), tx),
            Err(MqttError::InvalidQos(7))
        ));
    }

    #[tokio::test]
    async fn publish_requires_connection() {
        let (tx, _rx) = mpsc::channel(1);
        let handler = MqttHandler::spawn(unreachable_broker(), Vec::new(), tx).unwrap();

        assert!(!handler.is_connected());
        assert!(matches!(
            handler.publish("a/b", b"{}".to_vec()).await,
            Err(MqttError::NotConnected)
        ));
        assert!(matches!(
            handler.wait_connected(Duration::from_millis(200)).await,
            Err(MqttError::ConnectTimeout(_))
        ));
        assert!(handler.status().messages_sent == 0);

        handler.disconnect().await;
    }

    #[tokio::test]
    async fn failed_event_loop_task_is_reported() {
        let clean = tokio::spawn(async {});
        assert!(log_event_loop_exit(clean.await));

        let panicked = tokio::spawn(async { panic!("event loop crashed") });
        assert!(!log_event_loop_exit(panicked.await));
    }

    #[tokio::test]
    async fn restart_keeps_status_history() {
        let (tx, _rx) = mpsc::channel(1);
        let mut handler = MqttHandler::spawn(unreachable_broker(), Vec::new(), tx).unwrap();
        handler.restart().await;
        handler.restart().await;
        assert_eq!(handler.status().restarts, 2);
        handler.disconnect().await;
    }
}
