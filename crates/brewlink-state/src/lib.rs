//! `brewlink-state` – the single authoritative view of the appliance.
//!
//! # Modules
//!
//! - [`store`] – [`StateStore`][store::StateStore]: the one shared
//!   [`DeviceState`][brewlink_types::DeviceState], with consistent snapshot
//!   reads and atomic field merges.
//! - [`maintenance`] – [`MaintenancePolicy`][maintenance::MaintenancePolicy]:
//!   the rule engine that derives `maintenance_needed` on every merge from
//!   configurable thresholds.
//! - [`ingestor`] – [`StatusIngestor`][ingestor::StatusIngestor]: decodes
//!   controller reports (JSON records or legacy scalar tokens) arriving on
//!   the status lane and merges them into the store.
//!
//! The store is the only point of contact between the broker-driven
//! ingestion task and the request-driven dispatcher; neither knows the other
//! exists.

pub mod ingestor;
pub mod maintenance;
pub mod store;

pub use ingestor::{StatusIngestor, StatusUpdate, decode_status};
pub use maintenance::{MaintenancePolicy, MaintenanceRule, MaintenanceThresholds};
pub use store::{MergeReport, StateStore};
