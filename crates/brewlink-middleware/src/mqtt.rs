//! [`MqttTransport`] – the persistent broker connection.
//!
//! One background task owns the rumqttc [`EventLoop`] for the life of the
//! process. It:
//!
//! * (re-)subscribes to the command and status topics on every `ConnAck`,
//!   so a broker restart does not leave the process deaf;
//! * forwards every inbound publish onto the [`EventBus`] lane that matches
//!   its topic;
//! * on any connection error logs, waits an exponential backoff
//!   (`reconnect_min` doubling up to `reconnect_max`) and polls again.
//!   The loop never exits on its own.
//!
//! Publishing goes through the cloneable [`MqttTransport`] handle and is
//! refused immediately while the loop reports the broker as unreachable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brewlink_types::{BrewError, BrokerMessage};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::CommandPublisher;
use crate::bus::{EventBus, Topic};

/// `source` stamped on every [`BrokerMessage`] this transport produces.
pub const SOURCE: &str = "brewlink-middleware::mqtt";

/// Capacity of the request queue between [`AsyncClient`] and the event loop.
const REQUEST_CAPACITY: usize = 64;

/// Shortest keep-alive accepted for the broker session.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Connection parameters for [`MqttTransport::connect`].
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub command_topic: String,
    pub status_topic: String,
    /// Upper bound on a single publish hand-off.
    pub publish_timeout: Duration,
    /// First retry delay after a connection error.
    pub reconnect_min: Duration,
    /// Ceiling for the doubling retry delay.
    pub reconnect_max: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "brewlink".to_string(),
            keep_alive: Duration::from_secs(60),
            command_topic: "cafeteira/comando".to_string(),
            status_topic: "cafeteira/status".to_string(),
            publish_timeout: Duration::from_secs(5),
            reconnect_min: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

impl MqttSettings {
    /// Bus lane for a broker topic, or `None` for topics this process does
    /// not route.
    pub fn lane_for(&self, topic: &str) -> Option<Topic> {
        if topic == self.status_topic {
            Some(Topic::Status)
        } else if topic == self.command_topic {
            Some(Topic::Command)
        } else {
            None
        }
    }

    fn check(&self) -> Result<(), BrewError> {
        if self.host.trim().is_empty() {
            return Err(BrewError::Connection("broker host is empty".into()));
        }
        if self.keep_alive < MIN_KEEP_ALIVE {
            return Err(BrewError::Connection(format!(
                "keep-alive {:?} is below {:?}",
                self.keep_alive, MIN_KEEP_ALIVE
            )));
        }
        Ok(())
    }
}

/// Delay before the retry that follows one waited `current`.
pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Cloneable handle to the broker connection.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    settings: Arc<MqttSettings>,
    connected: watch::Receiver<bool>,
}

impl MqttTransport {
    /// Build the client and spawn the event-loop task.
    ///
    /// Returns as soon as the task is running; the first connection attempt
    /// happens inside it. Use [`MqttTransport::wait_connected`] to find out
    /// whether the broker answered.
    ///
    /// # Errors
    ///
    /// Returns [`BrewError::Connection`] for settings the client cannot use
    /// (empty host, keep-alive under five seconds).
    pub fn connect(
        settings: MqttSettings,
        bus: EventBus,
    ) -> Result<(Self, JoinHandle<()>), BrewError> {
        settings.check()?;

        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive);
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let settings = Arc::new(settings);
        let (connected_tx, connected) = watch::channel(false);
        let handle = tokio::spawn(drive(
            eventloop,
            client.clone(),
            Arc::clone(&settings),
            bus,
            connected_tx,
        ));

        Ok((
            Self {
                client,
                settings,
                connected,
            },
            handle,
        ))
    }

    /// `true` while the broker session is up.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until the broker acknowledges a session, at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`BrewError::Connection`] when no session came up in time.
    /// The event loop keeps retrying regardless.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), BrewError> {
        let mut connected = self.connected.clone();
        match tokio::time::timeout(timeout, connected.wait_for(|up| *up)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(BrewError::Connection("broker event loop stopped".into())),
            Err(_) => Err(BrewError::Connection(format!(
                "no session with {}:{} after {timeout:?}",
                self.settings.host, self.settings.port
            ))),
        }
    }

    /// Publish `payload` on `topic` (QoS 0, not retained).
    ///
    /// # Errors
    ///
    /// Returns [`BrewError::Publish`] when disconnected, when the client
    /// rejects the request, or when the hand-off exceeds `publish_timeout`.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrewError> {
        if !self.is_connected() {
            return Err(BrewError::Publish(format!(
                "not connected to broker {}:{}",
                self.settings.host, self.settings.port
            )));
        }

        let request = self
            .client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec());
        match tokio::time::timeout(self.settings.publish_timeout, request).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BrewError::Publish(e.to_string())),
            Err(_) => Err(BrewError::Publish(format!(
                "publish to {topic} timed out after {:?}",
                self.settings.publish_timeout
            ))),
        }
    }
}

#[async_trait]
impl CommandPublisher for MqttTransport {
    async fn publish_command(&self, command: &str) -> Result<(), BrewError> {
        self.publish(&self.settings.command_topic, command.as_bytes())
            .await
    }
}

/// Event-loop task body.
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    settings: Arc<MqttSettings>,
    bus: EventBus,
    connected: watch::Sender<bool>,
) {
    let mut backoff = settings.reconnect_min;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(host = %settings.host, port = settings.port, "connected to MQTT broker");
                backoff = settings.reconnect_min;
                connected.send_replace(true);

                // Clean sessions forget subscriptions, so renew them on every ack.
                for topic in [&settings.command_topic, &settings.status_topic] {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                        warn!(topic = %topic, error = %e, "subscribe request failed");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                route_inbound(&bus, &settings, &publish.topic, publish.payload.to_vec());
            }
            Ok(_) => {}
            Err(e) => {
                if connected.send_replace(false) {
                    warn!(error = %e, "lost connection to MQTT broker");
                }
                warn!(
                    host = %settings.host,
                    port = settings.port,
                    error = %e,
                    retry_in_ms = backoff.as_millis() as u64,
                    "broker unreachable; retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff, settings.reconnect_max);
            }
        }
    }
}

fn route_inbound(bus: &EventBus, settings: &MqttSettings, topic: &str, payload: Vec<u8>) {
    let Some(lane) = settings.lane_for(topic) else {
        debug!(topic = %topic, "ignoring message on unrouted topic");
        return;
    };
    debug!(topic = %topic, bytes = payload.len(), "inbound broker message");
    if let Err(e) = bus.publish_to(lane, BrokerMessage::new(SOURCE, topic, payload)) {
        debug!(topic = %topic, error = %e, "inbound message had no consumer");
    }
}
