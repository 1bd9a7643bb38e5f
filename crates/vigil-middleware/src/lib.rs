//! `vigil-middleware` – The Alert Sink
//!
//! Carries every event the hub classifies (pulses, relayed orders, malformed
//! lines, stale-client alerts, connection lifecycle) to whoever wants to
//! observe it, without caring about the event's meaning.
//!
//! # Modules
//!
//! - [`bus`] – Headless, topic-based publish/subscribe event bus built on
//!   Tokio broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
