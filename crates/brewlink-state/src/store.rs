//! [`StateStore`] – the process-wide [`DeviceState`].
//!
//! Created once at startup and handed by clone to every component that needs
//! it; all clones share one record behind a [`tokio::sync::RwLock`]:
//!
//! * [`StateStore::read`] takes the shared lock and clones, so a reader
//!   never sees half of a merge and readers do not block each other.
//! * [`StateStore::merge`] and [`StateStore::apply`] take the exclusive
//!   lock for the whole field-apply / derive / stamp sequence. Two merges
//!   never interleave; the last one to take the lock wins per field.
//!
//! Raw values are validated field by field. A bad value rejects that field
//! only and is reported in [`MergeReport::rejected`]; the rest of the merge
//! still lands and `last_activity` is still stamped.

use std::sync::Arc;

use brewlink_types::{DeviceState, FieldError, PowerStatus, local_timestamp};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::maintenance::MaintenancePolicy;

/// Result of one merge: the full record as it stood when the lock was
/// released, plus every field that was refused.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub state: DeviceState,
    pub rejected: Vec<FieldError>,
}

impl MergeReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Shared handle to the single device record. Clone it cheaply.
#[derive(Clone)]
pub struct StateStore {
    state: Arc<RwLock<DeviceState>>,
    policy: Arc<MaintenancePolicy>,
}

impl StateStore {
    /// Store seeded with [`DeviceState::default`].
    pub fn new(policy: MaintenancePolicy) -> Self {
        Self::with_state(DeviceState::default(), policy)
    }

    /// Store seeded with `initial`, taken as-is.
    pub fn with_state(initial: DeviceState, policy: MaintenancePolicy) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
            policy: Arc::new(policy),
        }
    }

    /// Consistent snapshot of the current record.
    pub async fn read(&self) -> DeviceState {
        self.state.read().await.clone()
    }

    /// Apply `partial` on top of the current record.
    ///
    /// Recognised fields are validated and written; unknown fields are kept
    /// verbatim in [`DeviceState::extra`]. `maintenance_needed` is then
    /// recomputed and `last_activity` stamped, whatever was rejected.
    pub async fn merge(&self, partial: &Map<String, Value>) -> MergeReport {
        let mut state = self.state.write().await;
        let rejected = apply_fields(&mut state, partial);
        self.finish(&mut state);
        MergeReport {
            state: state.clone(),
            rejected,
        }
    }

    /// Read-modify-write under one exclusive lock.
    ///
    /// `build` sees the current record and returns the partial to merge, so
    /// updates derived from the previous value (counters, toggles) are never
    /// lost to a concurrent writer.
    pub async fn apply<F>(&self, build: F) -> MergeReport
    where
        F: FnOnce(&DeviceState) -> Map<String, Value>,
    {
        let mut state = self.state.write().await;
        let partial = build(&state);
        let rejected = apply_fields(&mut state, &partial);
        self.finish(&mut state);
        MergeReport {
            state: state.clone(),
            rejected,
        }
    }

    fn finish(&self, state: &mut DeviceState) {
        let needed = self.policy.needs_maintenance(state);
        if needed && !state.maintenance_needed {
            let rules = self.policy.triggered_rules(state);
            warn!(?rules, "device needs maintenance");
        } else if !needed && state.maintenance_needed {
            info!("maintenance condition cleared");
        }
        state.maintenance_needed = needed;
        state.last_activity = local_timestamp();
    }
}

fn apply_fields(state: &mut DeviceState, partial: &Map<String, Value>) -> Vec<FieldError> {
    partial
        .iter()
        .filter_map(|(field, raw)| apply_field(state, field, raw).err())
        .collect()
}

fn apply_field(state: &mut DeviceState, field: &str, raw: &Value) -> Result<(), FieldError> {
    let invalid = |reason: String| FieldError::new(field, reason);

    match field {
        "status" => {
            state.status = raw
                .as_str()
                .and_then(PowerStatus::from_token)
                .ok_or_else(|| invalid(format!("unrecognised status {raw}")))?;
        }
        "temperature" => state.temperature = reading(raw).map_err(invalid)?,
        "pressure" => state.pressure = reading(raw).map_err(invalid)?,
        "water_level" => {
            let level = reading(raw).map_err(invalid)?;
            if !(0.0..=100.0).contains(&level) {
                return Err(invalid(format!("{level} is outside 0..=100")));
            }
            state.water_level = level;
        }
        "shots_count" => state.shots_count = count(raw).map_err(invalid)?,
        "maintenance_needed" | "last_activity" => {
            return Err(invalid("derived by the store, not accepted from input".into()));
        }
        _ => {
            state.extra.insert(field.to_string(), raw.clone());
        }
    }
    Ok(())
}

/// A finite number, given as a JSON number or numeric text.
fn reading(raw: &Value) -> Result<f64, String> {
    let value = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("{raw} is not a number"))?;

    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("{raw} is not finite"))
    }
}

/// A non-negative integer, given as a JSON number or numeric text.
fn count(raw: &Value) -> Result<u64, String> {
    match raw {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("{raw} is not a non-negative integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maintenance::MaintenanceThresholds;
    use serde_json::json;

    fn store() -> StateStore {
        StateStore::new(MaintenancePolicy::from_thresholds(
            MaintenanceThresholds::default(),
        ))
    }

    fn partial(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[tokio::test]
    async fn starts_with_safe_defaults() {
        let state = store().read().await;
        assert_eq!(state.status, PowerStatus::Off);
        assert_eq!(state.temperature, 0.0);
        assert_eq!(state.shots_count, 0);
        assert!(!state.maintenance_needed);
    }

    #[tokio::test]
    async fn merge_applies_textual_and_numeric_readings() {
        let store = store();
        let report = store
            .merge(&partial(json!({
                "status": "ligada",
                "temperature": "92.5",
                "water_level": 64,
                "pressure": "9",
                "shots_count": "7"
            })))
            .await;

        assert!(report.is_clean());
        assert_eq!(report.state.status, PowerStatus::On);
        assert_eq!(report.state.temperature, 92.5);
        assert_eq!(report.state.water_level, 64.0);
        assert_eq!(report.state.pressure, 9.0);
        assert_eq!(report.state.shots_count, 7);
        assert_eq!(store.read().await, report.state);
    }

    #[tokio::test]
    async fn bad_field_is_rejected_alone() {
        let store = store();
        let before = store.read().await;

        let report = store
            .merge(&partial(json!({ "water_level": "abc", "temperature": "50" })))
            .await;

        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].field, "water_level");
        assert_eq!(report.state.water_level, before.water_level);
        assert_eq!(report.state.temperature, 50.0);
        assert!(report.state.last_activity >= before.last_activity);
    }

    #[tokio::test]
    async fn unrecognised_status_is_not_stored() {
        let store = store();
        let report = store.merge(&partial(json!({ "status": "on" }))).await;
        assert_eq!(report.rejected[0].field, "status");
        assert_eq!(report.state.status, PowerStatus::Off);
    }

    #[tokio::test]
    async fn maintenance_flag_is_derived_not_accepted() {
        let store = store();

        let report = store
            .merge(&partial(json!({ "maintenance_needed": true })))
            .await;
        assert!(!report.state.maintenance_needed);
        assert_eq!(report.rejected[0].field, "maintenance_needed");

        let report = store.merge(&partial(json!({ "shots_count": 101 }))).await;
        assert!(report.state.maintenance_needed);

        let report = store.merge(&partial(json!({ "shots_count": 0 }))).await;
        assert!(!report.state.maintenance_needed);
    }

    #[tokio::test]
    async fn maintenance_boundaries_through_merge() {
        let store = store();
        let cases = [
            (json!({ "temperature": "95" }), false),
            (json!({ "temperature": "95.01" }), true),
            (json!({ "temperature": "20", "water_level": "20" }), false),
            (json!({ "water_level": "19" }), true),
            (json!({ "water_level": "80", "shots_count": 100 }), false),
            (json!({ "shots_count": 101 }), true),
        ];
        for (input, expected) in cases {
            let report = store.merge(&partial(input.clone())).await;
            assert_eq!(report.state.maintenance_needed, expected, "after merging {input}");
        }
    }

    #[tokio::test]
    async fn water_level_outside_percentage_is_rejected() {
        let store = store();
        let report = store.merge(&partial(json!({ "water_level": 120 }))).await;
        assert_eq!(report.rejected[0].field, "water_level");
        assert_eq!(report.state.water_level, 100.0);
    }

    #[tokio::test]
    async fn negative_or_fractional_shots_are_rejected() {
        let store = store();
        let report = store
            .merge(&partial(json!({ "shots_count": -1 })))
            .await;
        assert_eq!(report.rejected.len(), 1);

        let report = store.merge(&partial(json!({ "shots_count": 2.5 }))).await;
        assert_eq!(report.rejected.len(), 1);

        let report = store.merge(&partial(json!({ "shots_count": 3.0 }))).await;
        assert!(report.is_clean());
        assert_eq!(report.state.shots_count, 3);
    }

    #[tokio::test]
    async fn unknown_fields_pass_through() {
        let store = store();
        let report = store
            .merge(&partial(json!({ "firmware": "1.4.2", "grinder": { "rpm": 1200 } })))
            .await;
        assert!(report.is_clean());
        assert_eq!(report.state.extra["firmware"], json!("1.4.2"));
        assert_eq!(report.state.extra["grinder"]["rpm"], json!(1200));
    }

    #[tokio::test]
    async fn last_activity_never_goes_backwards() {
        let store = store();
        let mut previous = store.read().await.last_activity;
        for temperature in 0..5 {
            let report = store
                .merge(&partial(json!({ "temperature": temperature })))
                .await;
            assert!(report.state.last_activity >= previous);
            previous = report.state.last_activity;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let store = store();
        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .apply(|current| {
                        partial(json!({ "shots_count": current.shots_count + 1 }))
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.read().await.shots_count, 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_see_a_partial_merge() {
        let store = store();
        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..200u64 {
                    let level = if i % 2 == 0 { "10" } else { "90" };
                    store.merge(&partial(json!({ "water_level": level }))).await;
                }
            })
        };
        for _ in 0..200 {
            let snapshot = store.read().await;
            assert_eq!(
                snapshot.maintenance_needed,
                snapshot.water_level < 20.0,
                "flag must always match the readings it was derived from"
            );
        }
        writer.await.unwrap();
    }
}
