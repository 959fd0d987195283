//! `brewlink-middleware` – broker plumbing.
//!
//! Moves bytes between the MQTT broker and the rest of the process without
//! caring what they mean.
//!
//! # Modules
//!
//! - [`bus`] – in-process, topic-partitioned broadcast bus that fans inbound
//!   broker messages out to every interested consumer.
//! - [`adapter`] – the [`CommandPublisher`] seam the dispatcher publishes
//!   through.
//! - [`mqtt`] – [`MqttTransport`], the persistent broker connection with
//!   reconnect/backoff and re-subscription.

pub mod adapter;
pub mod bus;
pub mod mqtt;

pub use adapter::CommandPublisher;
pub use bus::{EventBus, Topic, TopicReceiver};
pub use mqtt::{MqttSettings, MqttTransport};
