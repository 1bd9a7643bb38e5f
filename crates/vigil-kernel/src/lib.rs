//! `vigil-kernel` – Liveness State & Timeout Detection
//!
//! The part of the hub that holds time-based state.  It does not speak the
//! wire protocol; it only records pulses and decides who has gone quiet.
//!
//! # Modules
//!
//! - [`registry`] – [`LivenessRegistry`][registry::LivenessRegistry]:
//!   the shared map from client identity to last-pulse instant.  Exposes only
//!   an atomic upsert ([`record`][registry::LivenessRegistry::record]) and a
//!   consistent copy ([`snapshot`][registry::LivenessRegistry::snapshot]).
//! - [`monitor`] – [`TimeoutMonitor`][monitor::TimeoutMonitor]:
//!   a single periodic task that scans registry snapshots and raises
//!   [`StaleAlert`][vigil_types::StaleAlert]s for clients whose last pulse is
//!   older than the deadline.

pub mod monitor;
pub mod registry;

pub use monitor::{AlertMode, MonitorConfig, TimeoutMonitor};
pub use registry::{LivenessRecord, LivenessRegistry, RecordOutcome, RecordPolicy};
