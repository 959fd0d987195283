//! Headless, topic-based publish/subscribe bus for inbound broker traffic.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others or the broker event loop.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Command`] | Echoes of the `ligar` / `desligar` tokens this process published |
//! | [`Topic::Status`] | Controller reports: JSON records or legacy scalar tokens |

use brewlink_types::{BrewError, BrokerMessage};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered messages before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// The two broker lanes this process cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Commands sent to the controller. The process subscribes to its own
    /// output, so this lane sees every command it published.
    Command,
    /// Status reported by the controller.
    Status,
}

/// Shared bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    command: broadcast::Sender<BrokerMessage>,
    status: broadcast::Sender<BrokerMessage>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (command, _) = broadcast::channel(capacity);
        let (status, _) = broadcast::channel(capacity);
        Self { command, status }
    }

    /// Publish `message` on the given [`Topic`] lane.
    ///
    /// Returns the number of receivers that were handed the message, or
    /// [`BrewError::Channel`] when nobody is listening on that lane.
    pub fn publish_to(&self, topic: Topic, message: BrokerMessage) -> Result<usize, BrewError> {
        self.sender(topic)
            .send(message)
            .map_err(|_| BrewError::Channel(format!("no subscribers for topic {topic:?}")))
    }

    /// Subscribe to a single [`Topic`] lane.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.sender(topic).subscribe(),
        }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<BrokerMessage> {
        match topic {
            Topic::Command => &self.command,
            Topic::Status => &self.status,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] lane.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<BrokerMessage>,
}

impl TopicReceiver {
    /// Wait for the next message on this lane.
    ///
    /// Returns:
    /// * `Ok(message)` – a successfully received message.
    /// * `Err(RecvError::Lagged(n))` – the subscriber fell behind and `n`
    ///   messages were dropped. The caller decides whether to continue.
    /// * `Err(RecvError::Closed)` – every sender is gone.
    pub async fn recv(&mut self) -> Result<BrokerMessage, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
