//! [`MaintenancePolicy`] – derives the `maintenance_needed` flag.
//!
//! Every registered [`MaintenanceRule`] looks at the merged
//! [`DeviceState`]; the device needs servicing when at least one of them
//! fires. The policy is evaluated by the store after each merge, never by
//! callers, so the flag cannot drift from the readings it summarises.
//!
//! Three built-in rules cover the controller's sensors:
//! - [`TemperatureAbove`] – boiler hotter than the configured ceiling.
//! - [`WaterLevelBelow`] – reservoir under the configured floor.
//! - [`ShotsAbove`] – more shots pulled than the service interval allows.
//!
//! All comparisons are strict: a reading exactly at its threshold does not
//! trigger.

use brewlink_types::DeviceState;
use serde::{Deserialize, Serialize};

/// A single condition that marks the device as due for servicing.
pub trait MaintenanceRule: Send + Sync {
    /// Name used in log fields.
    fn name(&self) -> &str;

    /// `true` when `state` violates this rule.
    fn triggered(&self, state: &DeviceState) -> bool;
}

/// Numeric limits behind the built-in rules. Missing keys take the
/// default limit when deserialised.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceThresholds {
    /// Degrees Celsius.
    pub max_temperature: f64,
    /// Percent.
    pub min_water_level: f64,
    pub max_shots: u64,
}

impl Default for MaintenanceThresholds {
    fn default() -> Self {
        Self {
            max_temperature: 95.0,
            min_water_level: 20.0,
            max_shots: 100,
        }
    }
}

/// Rule engine evaluated over a merged [`DeviceState`].
///
/// # Example
///
/// ```
/// use brewlink_state::maintenance::{MaintenancePolicy, MaintenanceThresholds};
/// use brewlink_types::DeviceState;
///
/// let policy = MaintenancePolicy::from_thresholds(MaintenanceThresholds::default());
///
/// let mut state = DeviceState::default();
/// assert!(!policy.needs_maintenance(&state));
///
/// state.water_level = 10.0;
/// assert!(policy.needs_maintenance(&state));
/// ```
#[derive(Default)]
pub struct MaintenancePolicy {
    rules: Vec<Box<dyn MaintenanceRule>>,
}

impl MaintenancePolicy {
    /// Create a policy with no rules; it never asks for maintenance.
    pub fn new() -> Self {
        Self::default()
    }

    /// The three built-in rules wired to `thresholds`.
    pub fn from_thresholds(thresholds: MaintenanceThresholds) -> Self {
        let mut policy = Self::new();
        policy.add_rule(Box::new(TemperatureAbove(thresholds.max_temperature)));
        policy.add_rule(Box::new(WaterLevelBelow(thresholds.min_water_level)));
        policy.add_rule(Box::new(ShotsAbove(thresholds.max_shots)));
        policy
    }

    /// Register another rule. Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn MaintenanceRule>) {
        self.rules.push(rule);
    }

    /// `true` iff at least one rule fires for `state`.
    pub fn needs_maintenance(&self, state: &DeviceState) -> bool {
        self.rules.iter().any(|rule| rule.triggered(state))
    }

    /// Names of every rule that fires for `state`.
    pub fn triggered_rules(&self, state: &DeviceState) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|rule| rule.triggered(state))
            .map(|rule| rule.name())
            .collect()
    }
}

/// Fires when `temperature` is strictly above the ceiling.
pub struct TemperatureAbove(pub f64);

impl MaintenanceRule for TemperatureAbove {
    fn name(&self) -> &str {
        "temperature_above"
    }

    fn triggered(&self, state: &DeviceState) -> bool {
        state.temperature > self.0
    }
}

/// Fires when `water_level` is strictly below the floor.
pub struct WaterLevelBelow(pub f64);

impl MaintenanceRule for WaterLevelBelow {
    fn name(&self) -> &str {
        "water_level_below"
    }

    fn triggered(&self, state: &DeviceState) -> bool {
        state.water_level < self.0
    }
}

/// Fires when `shots_count` is strictly above the service interval.
pub struct ShotsAbove(pub u64);

impl MaintenanceRule for ShotsAbove {
    fn name(&self) -> &str {
        "shots_above"
    }

    fn triggered(&self, state: &DeviceState) -> bool {
        state.shots_count > self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> MaintenancePolicy {
        MaintenancePolicy::from_thresholds(MaintenanceThresholds::default())
    }

    fn state(temperature: f64, water_level: f64, shots_count: u64) -> DeviceState {
        DeviceState {
            temperature,
            water_level,
            shots_count,
            ..DeviceState::default()
        }
    }

    #[test]
    fn nominal_readings_need_nothing() {
        assert!(!policy().needs_maintenance(&state(90.0, 80.0, 10)));
    }

    #[test]
    fn temperature_boundary() {
        assert!(!policy().needs_maintenance(&state(95.0, 80.0, 0)));
        assert!(policy().needs_maintenance(&state(95.01, 80.0, 0)));
    }

    #[test]
    fn water_level_boundary() {
        assert!(!policy().needs_maintenance(&state(20.0, 20.0, 0)));
        assert!(policy().needs_maintenance(&state(20.0, 19.0, 0)));
    }

    #[test]
    fn shots_boundary() {
        assert!(!policy().needs_maintenance(&state(20.0, 80.0, 100)));
        assert!(policy().needs_maintenance(&state(20.0, 80.0, 101)));
    }

    #[test]
    fn triggered_rules_lists_every_violation() {
        let policy = policy();
        let fired = policy.triggered_rules(&state(99.0, 5.0, 0));
        assert_eq!(fired, vec!["temperature_above", "water_level_below"]);
    }

    #[test]
    fn thresholds_come_from_configuration() {
        let strict = MaintenancePolicy::from_thresholds(MaintenanceThresholds {
            max_temperature: 80.0,
            min_water_level: 50.0,
            max_shots: 10,
        });
        assert!(strict.needs_maintenance(&state(85.0, 80.0, 0)));
        assert!(strict.needs_maintenance(&state(20.0, 40.0, 0)));
        assert!(strict.needs_maintenance(&state(20.0, 80.0, 11)));
        assert!(!strict.needs_maintenance(&state(80.0, 50.0, 10)));
    }

    #[test]
    fn empty_policy_never_fires() {
        assert!(!MaintenancePolicy::new().needs_maintenance(&state(500.0, 0.0, 10_000)));
    }
}
