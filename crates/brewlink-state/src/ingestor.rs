//! [`StatusIngestor`] – turns controller reports into store merges.
//!
//! The controller speaks two dialects on the status topic:
//!
//! | Payload | Meaning |
//! |---|---|
//! | `{"temperature": "93", "status": "ligada", …}` | Structured record, merged field by field |
//! | `ligada` / `desligada` | Legacy scalar: a new `status`, nothing else |
//!
//! Anything that is not valid JSON is tried as a legacy token; an
//! unrecognised token is dropped without touching the store. Nothing a
//! message contains can stop the ingestion loop: decode failures and
//! rejected fields are logged and the loop moves on.

use brewlink_middleware::{EventBus, Topic, TopicReceiver};
use brewlink_types::{BrewError, PowerStatus};
use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::{MergeReport, StateStore};

/// A decoded status payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// JSON object, field → raw value.
    Record(Map<String, Value>),
    /// Bare `ligada` / `desligada`.
    Legacy(PowerStatus),
}

impl StatusUpdate {
    fn into_partial(self) -> Map<String, Value> {
        match self {
            Self::Record(map) => map,
            Self::Legacy(status) => {
                let mut map = Map::new();
                map.insert("status".into(), Value::from(status.as_token()));
                map
            }
        }
    }
}

/// Decode one status payload.
///
/// Returns `Ok(None)` for a scalar that is not a recognised token.
///
/// # Errors
///
/// [`BrewError::Decode`] for non-UTF-8 bytes, or for JSON that is not an
/// object (arrays, numbers, quoted strings).
pub fn decode_status(payload: &[u8]) -> Result<Option<StatusUpdate>, BrewError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| BrewError::Decode(format!("status payload is not UTF-8: {e}")))?;

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(Some(StatusUpdate::Record(map))),
        Ok(other) => Err(BrewError::Decode(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(_) => Ok(PowerStatus::from_token(text).map(StatusUpdate::Legacy)),
    }
}

/// Consumes the status lane and merges into the [`StateStore`].
#[derive(Clone)]
pub struct StatusIngestor {
    store: StateStore,
}

impl StatusIngestor {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Process one status payload.
    ///
    /// Returns the merge report, or `None` when the payload was dropped
    /// (decode failure or unrecognised legacy token).
    pub async fn ingest(&self, payload: &[u8]) -> Option<MergeReport> {
        let update = match decode_status(payload) {
            Ok(Some(update)) => update,
            Ok(None) => {
                debug!(
                    payload = %String::from_utf8_lossy(payload),
                    "discarding unrecognised status token"
                );
                return None;
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed status message");
                return None;
            }
        };

        let report = self.store.merge(&update.into_partial()).await;
        for rejected in &report.rejected {
            let error = BrewError::FieldValidation(rejected.clone());
            warn!(%error, "status field rejected");
        }
        debug!(
            status = %report.state.status,
            maintenance_needed = report.state.maintenance_needed,
            "device state merged"
        );
        Some(report)
    }

    /// Subscribe to both lanes and run [`StatusIngestor::run`] on a task.
    ///
    /// Subscribing happens before the task starts, so nothing published
    /// after this call returns is missed.
    pub fn spawn(self, bus: &EventBus) -> JoinHandle<()> {
        let status = bus.subscribe_to(Topic::Status);
        let commands = bus.subscribe_to(Topic::Command);
        tokio::spawn(self.run(status, commands))
    }

    /// Ingestion loop. Returns only when the bus shuts down.
    ///
    /// Command echoes are observed and logged, never merged: the dispatcher
    /// already recorded its own optimistic update.
    pub async fn run(self, mut status: TopicReceiver, mut commands: TopicReceiver) {
        loop {
            tokio::select! {
                received = status.recv() => match received {
                    Ok(message) => {
                        self.ingest(&message.payload).await;
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(lane = ?status.topic(), skipped = n, "status ingestion lagged; messages dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                received = commands.recv() => match received {
                    Ok(message) => {
                        debug!(
                            command = %String::from_utf8_lossy(&message.payload),
                            "observed command echo"
                        );
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(lane = ?commands.topic(), skipped = n, "command echo lane lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        info!("status ingestion stopped: bus closed");
    }
}
