//! `brewlink-types` – shared vocabulary for every brewlink crate.
//!
//! Holds the single device record ([`DeviceState`]), the closed set of
//! commands the chat surface may produce ([`CommandIntent`]), the envelope
//! routed over the in-process bus ([`BrokerMessage`]) and the error taxonomy
//! ([`BrewError`]).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Format used for [`DeviceState::last_activity`].
///
/// Year-first so that two stamps compare correctly as plain strings.
pub const LAST_ACTIVITY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local wall-clock time rendered with [`LAST_ACTIVITY_FORMAT`].
pub fn local_timestamp() -> String {
    Local::now().format(LAST_ACTIVITY_FORMAT).to_string()
}

/// Power state of the appliance.
///
/// The wire tokens are the ones the controller firmware speaks; they are
/// also the only two values a legacy scalar status message may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PowerStatus {
    #[serde(rename = "ligada")]
    On,
    #[default]
    #[serde(rename = "desligada")]
    Off,
}

impl PowerStatus {
    pub const ON_TOKEN: &'static str = "ligada";
    pub const OFF_TOKEN: &'static str = "desligada";

    /// Parse an exact wire token. No trimming, no case folding.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            Self::ON_TOKEN => Some(Self::On),
            Self::OFF_TOKEN => Some(Self::Off),
            _ => None,
        }
    }

    pub fn as_token(self) -> &'static str {
        match self {
            Self::On => Self::ON_TOKEN,
            Self::Off => Self::OFF_TOKEN,
        }
    }
}

impl fmt::Display for PowerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Outcome of classifying one chat message.
///
/// Transient: produced by the command interpreter, consumed by the
/// dispatcher, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandIntent {
    TurnOn,
    TurnOff,
    None,
}

impl CommandIntent {
    pub const ON_COMMAND: &'static str = "ligar";
    pub const OFF_COMMAND: &'static str = "desligar";

    /// Token published on the command topic, if this intent produces one.
    pub fn command_token(self) -> Option<&'static str> {
        match self {
            Self::TurnOn => Some(Self::ON_COMMAND),
            Self::TurnOff => Some(Self::OFF_COMMAND),
            Self::None => None,
        }
    }

    /// Power status the device is expected to reach once the command lands.
    pub fn target_status(self) -> Option<PowerStatus> {
        match self {
            Self::TurnOn => Some(PowerStatus::On),
            Self::TurnOff => Some(PowerStatus::Off),
            Self::None => None,
        }
    }
}

/// The authoritative view of the appliance.
///
/// Numeric readings travel as text on the wire (`"temperature": "92.5"`),
/// so they serialise as strings and deserialise from either form. Any
/// field a status message carries beyond the known ones is kept verbatim
/// in [`DeviceState::extra`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub status: PowerStatus,
    pub last_activity: String,
    #[serde(with = "textual")]
    pub temperature: f64,
    #[serde(with = "textual")]
    pub water_level: f64,
    #[serde(with = "textual")]
    pub pressure: f64,
    pub shots_count: u64,
    pub maintenance_needed: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for DeviceState {
    /// Power off, cold, full tank, no shots pulled, nothing to service.
    fn default() -> Self {
        Self {
            status: PowerStatus::Off,
            last_activity: local_timestamp(),
            temperature: 0.0,
            water_level: 100.0,
            pressure: 0.0,
            shots_count: 0,
            maintenance_needed: false,
            extra: BTreeMap::new(),
        }
    }
}

/// A single field of a merge that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Envelope for a message delivered by the broker.
///
/// The transport stamps every inbound publish with an id and arrival time
/// before handing it to the in-process bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. "brewlink-middleware::mqtt"
    pub source: String,
    /// Broker topic the message arrived on.
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    pub fn new(source: impl Into<String>, topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            topic: topic.into(),
            payload,
        }
    }
}

/// Error taxonomy shared across the workspace.
///
/// Every variant describes a failure local to one message, one field or one
/// outbound request; none of them is meant to stop the process once it has
/// started.
#[derive(Error, Debug)]
pub enum BrewError {
    #[error("Broker Connection Error: {0}")]
    Connection(String),

    #[error("Publish Error: {0}")]
    Publish(String),

    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("Field Validation Error: {0}")]
    FieldValidation(FieldError),

    #[error("External Service Error: {0}")]
    ExternalService(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Event Bus Error: {0}")]
    Channel(String),
}

/// Serde adapter for readings that travel as text.
mod textual {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        struct Reading;

        impl Visitor<'_> for Reading {
            type Value = f64;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number or a numeric string")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
                Ok(v as f64)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
                Ok(v as f64)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
                v.trim().parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(Reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_status_tokens_are_exact() {
        assert_eq!(PowerStatus::from_token("ligada"), Some(PowerStatus::On));
        assert_eq!(PowerStatus::from_token("desligada"), Some(PowerStatus::Off));
        assert_eq!(PowerStatus::from_token("Ligada"), None);
        assert_eq!(PowerStatus::from_token(" ligada"), None);
        assert_eq!(PowerStatus::from_token("foo"), None);
    }

    #[test]
    fn command_intent_maps_to_token_and_status() {
        assert_eq!(CommandIntent::TurnOn.command_token(), Some("ligar"));
        assert_eq!(CommandIntent::TurnOff.command_token(), Some("desligar"));
        assert_eq!(CommandIntent::None.command_token(), None);
        assert_eq!(CommandIntent::TurnOn.target_status(), Some(PowerStatus::On));
        assert_eq!(CommandIntent::None.target_status(), None);
    }

    #[test]
    fn default_state_is_safe() {
        let state = DeviceState::default();
        assert_eq!(state.status, PowerStatus::Off);
        assert_eq!(state.shots_count, 0);
        assert!(!state.maintenance_needed);
        assert!(!state.last_activity.is_empty());
    }

    #[test]
    fn device_state_serialises_readings_as_text() {
        let mut state = DeviceState::default();
        state.temperature = 92.5;
        state.extra.insert("firmware".into(), serde_json::json!("1.2.0"));
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "desligada");
        assert_eq!(json["temperature"], "92.5");
        assert_eq!(json["water_level"], "100");
        assert_eq!(json["shots_count"], 0);
        assert_eq!(json["firmware"], "1.2.0");
    }

    #[test]
    fn device_state_accepts_numeric_or_textual_readings() {
        let raw = r#"{
            "status": "ligada",
            "last_activity": "2024-01-01 10:00:00",
            "temperature": 93,
            "water_level": "55.5",
            "pressure": "9",
            "shots_count": 12,
            "maintenance_needed": false
        }"#;
        let state: DeviceState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.status, PowerStatus::On);
        assert_eq!(state.temperature, 93.0);
        assert_eq!(state.water_level, 55.5);
        assert!(state.extra.is_empty());
    }

    #[test]
    fn brew_error_display() {
        let err = BrewError::FieldValidation(FieldError::new("water_level", "not a number"));
        assert!(err.to_string().contains("water_level"));
        let err = BrewError::Publish("not connected".into());
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn local_timestamp_uses_sortable_format() {
        let ts = local_timestamp();
        assert!(chrono::NaiveDateTime::parse_from_str(&ts, LAST_ACTIVITY_FORMAT).is_ok());
    }
}
