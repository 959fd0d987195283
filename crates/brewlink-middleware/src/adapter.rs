//! The outbound seam.
//!
//! The dispatcher never talks to the broker client directly. It hands a
//! command token to a [`CommandPublisher`]; [`MqttTransport`] is the
//! production implementation and tests substitute an in-memory recorder.
//!
//! [`MqttTransport`]: crate::mqtt::MqttTransport

use async_trait::async_trait;
use brewlink_types::BrewError;

/// Anything that can deliver a command token to the appliance.
///
/// # Contract
///
/// * Returns `Ok(())` once the token has been handed to the transport.
///   Delivery to the device is not confirmed.
/// * Returns [`BrewError::Publish`] when the transport is disconnected or
///   the hand-off did not finish within the transport's timeout.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish_command(&self, command: &str) -> Result<(), BrewError>;
}
